//! Configuration for the sogrep service.

use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Service configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Address the HTTP listener binds to
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Root of the repository tree holding the links databases
    #[serde(default = "default_repository_dir")]
    pub repository_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Prefix log lines with a timestamp
    #[serde(default = "default_log_timestamp")]
    pub log_timestamp: bool,

    /// Debounce window for rebuild triggers, in milliseconds
    #[serde(default = "default_debounce_interval_ms")]
    pub debounce_interval_ms: u64,

    /// Grace period for shutdown, in milliseconds
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

fn default_listen_address() -> String {
    "localhost:8080".to_string()
}

fn default_repository_dir() -> PathBuf {
    PathBuf::from("/srv/ftp")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_timestamp() -> bool {
    true
}

fn default_debounce_interval_ms() -> u64 {
    10_000
}

fn default_shutdown_timeout_ms() -> u64 {
    10_000
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            repository_dir: default_repository_dir(),
            log_level: default_log_level(),
            log_timestamp: default_log_timestamp(),
            debounce_interval_ms: default_debounce_interval_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl ServiceConfig {
    /// Default config file location: `<config_dir>/sogrep/config.yaml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("sogrep").join("config.yaml"))
    }

    /// Load the config file at the default location, falling back to
    /// defaults when there is none.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => {
                tracing::debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let config = serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        tracing::debug!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    pub fn debounce_interval(&self) -> Duration {
        Duration::from_millis(self.debounce_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}
