//! Server configuration.
//!
//! Resolution order, lowest to highest: built-in defaults, a JSON config
//! file, `GOSTER_*` environment variables, CLI flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration failures during startup.
#[derive(Debug, thiserror::Error)]
#[error("Configuration error: {0}")]
pub struct ConfigError(String);

/// Runtime settings for the ingestion server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP listen port for the Goster-WY endpoint.
    pub port: u16,
    /// Per-frame read deadline in seconds; an idle device is disconnected
    /// once it elapses.
    pub read_timeout_secs: u64,
    /// Heartbeat age beyond which a device is classified offline.
    pub death_line_secs: u64,
    /// Bounded downlink queue depth per device.
    pub downlink_queue_depth: usize,
    /// SQLite database file; a per-user default applies when unset.
    pub database_path: Option<PathBuf>,
    /// Default `RUST_LOG` filter when the env var is absent.
    pub log_filter: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8081,
            read_timeout_secs: 60,
            death_line_secs: 60,
            downlink_queue_depth: 100,
            database_path: None,
            log_filter: "goster_server=info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration: defaults, then the file (when given), then the
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigError(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            ConfigError(format!(
                "Failed to parse config file {}: {e}",
                path.display()
            ))
        })
    }

    /// Apply `GOSTER_*` environment overrides on top of the current values.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("GOSTER_PORT") {
            if let Ok(n) = val.parse() {
                self.port = n;
            }
        }
        if let Ok(val) = std::env::var("GOSTER_READ_TIMEOUT_SECS") {
            if let Ok(n) = val.parse() {
                self.read_timeout_secs = n;
            }
        }
        if let Ok(val) = std::env::var("GOSTER_DEATH_LINE_SECS") {
            if let Ok(n) = val.parse() {
                self.death_line_secs = n;
            }
        }
        if let Ok(val) = std::env::var("GOSTER_DB_PATH") {
            self.database_path = Some(PathBuf::from(val));
        }
        if let Ok(val) = std::env::var("GOSTER_LOG") {
            self.log_filter = val;
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn death_line(&self) -> Duration {
        Duration::from_secs(self.death_line_secs)
    }
}
