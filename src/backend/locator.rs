//! Backend lookup for a repository.
//!
//! Stands in for the API-gateway lookup that decides which backend serves a
//! repository. The static locator maps everything to one configured backend.

use thiserror::Error;

use crate::backend::descriptor::BackendDescriptor;
use crate::backend::wire::Repository;
use crate::config::BackendConfig;

/// Everything the bridge needs to reach a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPackTarget {
    pub backend: BackendDescriptor,
    pub repository: Repository,
    pub git_config_options: Vec<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LocateError {
    #[error("invalid repository path '{0}'")]
    InvalidPath(String),
}

/// Resolves a repository path to a backend.
pub trait BackendLocator: Send + Sync {
    fn locate(&self, repo_path: &str) -> Result<UploadPackTarget, LocateError>;
}

/// Routes every repository to a single backend and storage.
#[derive(Debug, Clone)]
pub struct StaticLocator {
    backend: BackendDescriptor,
    storage_name: String,
    git_config_options: Vec<String>,
}

impl StaticLocator {
    pub fn new(backend: BackendDescriptor, storage_name: impl Into<String>) -> Self {
        Self {
            backend,
            storage_name: storage_name.into(),
            git_config_options: Vec::new(),
        }
    }

    pub fn from_config(config: &BackendConfig) -> Self {
        let backend = BackendDescriptor {
            address: config.address.clone(),
            token: config.token.clone(),
        };
        Self {
            backend,
            storage_name: config.storage_name.clone(),
            git_config_options: config.git_config_options.clone(),
        }
    }
}

impl BackendLocator for StaticLocator {
    fn locate(&self, repo_path: &str) -> Result<UploadPackTarget, LocateError> {
        let relative = repo_path.trim_matches('/');
        let traverses = relative
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");
        if relative.is_empty() || traverses {
            return Err(LocateError::InvalidPath(repo_path.to_string()));
        }

        let relative_path = if relative.ends_with(".git") {
            relative.to_string()
        } else {
            format!("{}.git", relative)
        };

        Ok(UploadPackTarget {
            backend: self.backend.clone(),
            repository: Repository {
                storage_name: self.storage_name.clone(),
                relative_path,
            },
            git_config_options: self.git_config_options.clone(),
        })
    }
}
