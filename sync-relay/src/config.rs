//! Configuration loading for sync-relay.
//!
//! Configuration is loaded from a TOML file (default: `relay.toml`).
//! Both sections and every field have defaults.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use sync_types::DEFAULT_PORT;

/// Root configuration for sync-relay.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// TCP bind address (default: 0.0.0.0:59090).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// How often the accept loop checks for shutdown, in ms (default: 100).
    #[serde(default = "default_accept_poll_ms")]
    pub accept_poll_ms: u64,
    /// Timeout in seconds for the whole introduce sequence (default: 10).
    /// Connections that don't finish it within this time are dropped.
    #[serde(default = "default_hello_timeout_secs")]
    pub hello_timeout_secs: u64,
    /// How long shutdown waits for user workers, in seconds (default: 5).
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory holding one subdirectory per user (default: `./boxes`).
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
}

// Default value functions
fn default_bind_address() -> String {
    format!("0.0.0.0:{}", DEFAULT_PORT)
}

fn default_accept_poll_ms() -> u64 {
    100
}

fn default_hello_timeout_secs() -> u64 {
    10
}

fn default_shutdown_grace_secs() -> u64 {
    5
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("boxes")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            accept_poll_ms: default_accept_poll_ms(),
            hello_timeout_secs: default_hello_timeout_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl ServerConfig {
    /// Accept poll interval as a [`Duration`].
    pub fn accept_poll(&self) -> Duration {
        Duration::from_millis(self.accept_poll_ms.max(1))
    }

    /// Introduce timeout as a [`Duration`].
    pub fn hello_timeout(&self) -> Duration {
        Duration::from_secs(self.hello_timeout_secs)
    }

    /// Shutdown grace period as a [`Duration`].
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Config for a relay bound to an ephemeral localhost port, storing under `root`.
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        Self {
            server: ServerConfig {
                bind_address: "127.0.0.1:0".to_string(),
                ..ServerConfig::default()
            },
            storage: StorageConfig { root: root.into() },
        }
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}
