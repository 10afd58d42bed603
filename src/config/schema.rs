//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the upload-pack proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Backend RPC service serving every repository.
    pub backend: BackendConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8181").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8181".to_string(),
        }
    }
}

/// Backend RPC endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendConfig {
    /// `tcp://host:port` or `unix:///path/to/socket`.
    pub address: String,

    /// Token forwarded with every call.
    pub token: Option<String>,

    /// Storage name the backend serves repositories from.
    pub storage_name: String,

    /// Extra `git -c` options passed to upload-pack.
    pub git_config_options: Vec<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            address: "unix:///var/run/git-backend/backend.sock".to_string(),
            token: None,
            storage_name: "default".to_string(),
            git_config_options: Vec::new(),
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Wall-clock limit for one whole upload-pack exchange, in seconds.
    pub upload_pack_secs: u64,

    /// Backend connection establishment timeout in seconds.
    pub connect_secs: u64,
}

impl TimeoutConfig {
    pub fn upload_pack(&self) -> Duration {
        Duration::from_secs(self.upload_pack_secs)
    }

    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            upload_pack_secs: 600,
            connect_secs: 5,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// "text" or "json".
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "text".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9236".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_uses_defaults() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [backend]
            address = "tcp://127.0.0.1:8075"

            [timeouts]
            upload_pack_secs = 30
            "#,
        )
        .unwrap();

        assert_eq!(config.backend.address, "tcp://127.0.0.1:8075");
        assert_eq!(config.backend.storage_name, "default");
        assert_eq!(config.timeouts.upload_pack(), Duration::from_secs(30));
        assert_eq!(config.timeouts.connect(), Duration::from_secs(5));
        assert_eq!(config.listener.bind_address, "0.0.0.0:8181");
    }
}
