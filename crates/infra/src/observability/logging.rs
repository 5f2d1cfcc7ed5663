//! `tracing-subscriber` initialisation.
//!
//! `RUST_LOG` takes precedence over [`LoggingConfig::filter`] when it is set
//! and parses.

use serde::{Deserialize, Serialize};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use vigil_common::{AppError, AppResult};

use super::ObservabilityError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive, e.g. `info,vigil_core=debug`
    pub filter: String,
    /// Emit newline-delimited JSON instead of the human-readable format
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { filter: "info".to_string(), json: false }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> AppResult<()> {
        if self.filter.trim().is_empty() {
            return Err(AppError::configuration("logging.filter", "filter must not be empty"));
        }
        EnvFilter::try_new(&self.filter).map(|_| ()).map_err(|err| {
            AppError::configuration("logging.filter", format!("invalid filter: {err}"))
        })
    }
}

/// Install the global subscriber.
///
/// Returns `Ok(false)` when a subscriber was already installed, so calling
/// this more than once is harmless.
pub fn init_tracing(config: &LoggingConfig) -> Result<bool, ObservabilityError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.filter).map_err(|err| {
            ObservabilityError::InvalidFilter {
                filter: config.filter.clone(),
                message: err.to_string(),
            }
        })?,
    };

    let json = config.json.then(|| tracing_subscriber::fmt::layer().json().with_target(true));
    let text = (!config.json).then(|| tracing_subscriber::fmt::layer().with_target(false));

    let installed =
        tracing_subscriber::registry().with(filter).with(json).with(text).try_init().is_ok();
    if installed {
        tracing::debug!(filter = %config.filter, json = config.json, "tracing_initialized");
    }
    Ok(installed)
}
