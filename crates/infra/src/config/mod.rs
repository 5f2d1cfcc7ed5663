//! Configuration loading and management
//!
//! [`VigilConfig`] aggregates the per-component settings. It is read from a
//! TOML or JSON file and then adjusted by `VIGIL_*` environment variables;
//! see [`loader`] for the exact rules.

pub mod loader;

use serde::{Deserialize, Serialize};
use vigil_common::{AppError, AppResult};
use vigil_core::{MonitorConfig, RecoveryConfig};

use crate::client::ClientConfig;
use crate::observability::LoggingConfig;

// Re-export commonly used items
pub use loader::{apply_overrides, load, load_from_file, probe_config_paths, ConfigError};

/// Settings for every Vigil component.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VigilConfig {
    pub client: ClientConfig,
    pub monitor: MonitorConfig,
    pub recovery: RecoveryConfig,
    pub logging: LoggingConfig,
}

impl VigilConfig {
    pub fn validate(&self) -> AppResult<()> {
        self.client.validate()?;
        self.monitor.validate()?;
        self.recovery.validate()?;
        self.logging.validate()
    }
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Invalid(inner) => inner,
            other => {
                let message = other.to_string();
                AppError::configuration("config", message).with_cause(other)
            }
        }
    }
}
