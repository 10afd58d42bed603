//! Backend descriptor and address parsing.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Identifies one backend RPC endpoint.
///
/// Resolved by the backend locator; immutable for the lifetime of a request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BackendDescriptor {
    /// `tcp://host:port` or `unix:///path/to/socket`.
    pub address: String,

    /// Credential forwarded with every RPC call.
    #[serde(default)]
    pub token: Option<String>,
}

impl BackendDescriptor {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Parse the address into a dialable form.
    pub fn parse_address(&self) -> Result<BackendAddress, AddressError> {
        BackendAddress::parse(&self.address)
    }
}

/// A dialable backend address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendAddress {
    /// `host:port`
    Tcp(String),
    Unix(PathBuf),
}

/// Errors from backend address parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid backend address '{address}': {reason}")]
    Invalid { address: String, reason: String },

    #[error("unsupported backend address scheme '{0}'")]
    UnsupportedScheme(String),
}

impl BackendAddress {
    pub fn parse(address: &str) -> Result<Self, AddressError> {
        let invalid = |reason: &str| AddressError::Invalid {
            address: address.to_string(),
            reason: reason.to_string(),
        };

        let url = Url::parse(address).map_err(|e| invalid(&e.to_string()))?;
        match url.scheme() {
            "tcp" => {
                let host = url.host_str().ok_or_else(|| invalid("missing host"))?;
                let port = url.port().ok_or_else(|| invalid("missing port"))?;
                Ok(BackendAddress::Tcp(format!("{}:{}", host, port)))
            }
            "unix" => {
                if url.path().is_empty() {
                    return Err(invalid("missing socket path"));
                }
                Ok(BackendAddress::Unix(PathBuf::from(url.path())))
            }
            other => Err(AddressError::UnsupportedScheme(other.to_string())),
        }
    }
}

impl fmt::Display for BackendAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendAddress::Tcp(addr) => write!(f, "tcp://{}", addr),
            BackendAddress::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}
