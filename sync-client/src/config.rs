//! Configuration loading for the client.
//!
//! Configuration is loaded from an optional TOML file (default: `client.toml`).
//! Every field has a default, so an empty file is a valid configuration.

use boxsync_core::{JobKind, JobSchedule};
use boxsync_types::DEFAULT_PORT;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for a client session.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Relay address as `host:port` (default: 127.0.0.1:59090).
    #[serde(default = "default_relay_address")]
    pub relay_address: String,
    /// Upper bound for one protocol exchange, in seconds (default: 30).
    #[serde(default = "default_exchange_timeout_secs")]
    pub exchange_timeout_secs: u64,
    /// How long shutdown waits for one-shot work, in seconds (default: 5).
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    /// Quiet window that closes a batch of local changes, in ms (default: 200).
    #[serde(default = "default_watch_debounce_ms")]
    pub watch_debounce_ms: u64,
    /// Recurring job timings.
    #[serde(default)]
    pub jobs: JobsConfig,
}

/// Start delay and period of each recurring job.
#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    /// Directory watcher (default: 3s / 4s).
    #[serde(default = "default_watcher")]
    pub watcher: JobSchedule,
    /// Roster refresh (default: 1s / 4s).
    #[serde(default = "default_user_list")]
    pub user_list: JobSchedule,
    /// Share poll (default: 2s / 4s).
    #[serde(default = "default_share_poll")]
    pub share_poll: JobSchedule,
}

// Default value functions
fn default_relay_address() -> String {
    format!("127.0.0.1:{}", DEFAULT_PORT)
}

fn default_exchange_timeout_secs() -> u64 {
    30
}

fn default_shutdown_grace_secs() -> u64 {
    5
}

fn default_watch_debounce_ms() -> u64 {
    crate::watcher::DEFAULT_DEBOUNCE_MS
}

fn default_watcher() -> JobSchedule {
    JobKind::DirectoryWatcher.default_schedule()
}

fn default_user_list() -> JobSchedule {
    JobKind::UserListPoll.default_schedule()
}

fn default_share_poll() -> JobSchedule {
    JobKind::SharePoll.default_schedule()
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            watcher: default_watcher(),
            user_list: default_user_list(),
            share_poll: default_share_poll(),
        }
    }
}

impl JobsConfig {
    /// Schedule for `kind`.
    pub fn schedule(&self, kind: JobKind) -> JobSchedule {
        match kind {
            JobKind::DirectoryWatcher => self.watcher,
            JobKind::UserListPoll => self.user_list,
            JobKind::SharePoll => self.share_poll,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_address: default_relay_address(),
            exchange_timeout_secs: default_exchange_timeout_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            watch_debounce_ms: default_watch_debounce_ms(),
            jobs: JobsConfig::default(),
        }
    }
}

impl ClientConfig {
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

    /// Exchange timeout as a [`Duration`].
    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_secs(self.exchange_timeout_secs)
    }

    /// Shutdown grace period as a [`Duration`].
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Watcher debounce window as a [`Duration`].
    pub fn watch_debounce(&self) -> Duration {
        Duration::from_millis(self.watch_debounce_ms)
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
