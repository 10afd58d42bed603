//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::ProxyConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<ProxyConfig, ConfigError> {
    let config: ProxyConfig = toml::from_str(content).map_err(ConfigError::Parse)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_file_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[backend]\naddress = \"unix:///tmp/backend.sock\"\ntoken = \"secret\"\n\n[timeouts]\nupload_pack_secs = 120"
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.backend.token.as_deref(), Some("secret"));
        assert_eq!(config.timeouts.upload_pack_secs, 120);
    }

    #[test]
    fn reports_validation_errors() {
        let err = parse_config("[timeouts]\nconnect_secs = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref errors) if errors.len() == 1));
        assert!(err.to_string().contains("connect_secs"));

        assert!(matches!(parse_config("listener = 3"), Err(ConfigError::Parse(_))));
        assert!(matches!(
            load_config(Path::new("/nonexistent/proxy.toml")),
            Err(ConfigError::Io(_))
        ));
    }
}
