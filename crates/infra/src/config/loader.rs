//! Configuration loader
//!
//! ## Loading Strategy
//! 1. Probe for a config file; the first hit wins
//! 2. No file found: start from [`VigilConfig::default`]
//! 3. Apply environment overrides
//! 4. Validate the result
//!
//! ## File Locations
//! 1. `./vigil.toml`
//! 2. `./vigil.json`
//! 3. `./config/vigil.toml`
//!
//! ## Environment Variables
//! - `VIGIL_BASE_URL`: client base URL
//! - `VIGIL_TIMEOUT_MS`: per-attempt client timeout
//! - `VIGIL_RETRY_ATTEMPTS`: additional attempts after a network failure
//! - `VIGIL_RETRY_DELAY_MS`: base retry delay
//! - `VIGIL_FAILURE_THRESHOLD`: breaker failure threshold
//! - `VIGIL_BREAKER_TIMEOUT_MS`: breaker open-state timeout
//! - `VIGIL_RETENTION_MS`: monitor retention window
//! - `VIGIL_LOG_FILTER`: default tracing filter directive
//! - `VIGIL_LOG_JSON`: JSON log output (true/false)
//!
//! Setting either breaker variable enables the breaker if the file had
//! disabled it.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use vigil_common::{AppError, CircuitBreakerConfig};

use super::VigilConfig;

/// Candidate files, relative to the working directory, in probe order.
pub const CONFIG_CANDIDATES: [&str; 3] = ["vigil.toml", "vigil.json", "config/vigil.toml"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported config format: {0}")]
    UnsupportedFormat(String),

    #[error("invalid value for {key}: '{value}' ({reason})")]
    InvalidEnv { key: String, value: String, reason: String },

    #[error("invalid configuration: {0}")]
    Invalid(#[source] AppError),
}

/// Load configuration from the first probed file (or defaults), then apply
/// environment overrides and validate.
///
/// # Errors
/// Returns [`ConfigError`] if the file cannot be read or parsed, an override
/// does not parse, or the merged configuration is invalid.
pub fn load() -> Result<VigilConfig, ConfigError> {
    let mut config = match probe_config_paths() {
        Some(path) => read_file(&path)?,
        None => {
            tracing::debug!("no config file found, using defaults");
            VigilConfig::default()
        }
    };
    apply_overrides(&mut config, |key| std::env::var(key).ok())?;
    config.validate().map_err(ConfigError::Invalid)?;
    Ok(config)
}

/// Load and validate a single file; no environment overrides.
///
/// Format is detected by extension (`.toml` or `.json`).
pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<VigilConfig, ConfigError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }
    let config = read_file(path)?;
    config.validate().map_err(ConfigError::Invalid)?;
    Ok(config)
}

/// First existing entry of [`CONFIG_CANDIDATES`] under the working directory.
pub fn probe_config_paths() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    probe_in(&cwd)
}

fn probe_in(dir: &Path) -> Option<PathBuf> {
    CONFIG_CANDIDATES.iter().map(|candidate| dir.join(candidate)).find(|path| path.is_file())
}

fn read_file(path: &Path) -> Result<VigilConfig, ConfigError> {
    tracing::info!(path = %path.display(), "loading_configuration");
    let contents = std::fs::read_to_string(path)
        .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
    parse_config(&contents, path)
}

fn parse_config(contents: &str, path: &Path) -> Result<VigilConfig, ConfigError> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match extension {
        "toml" => Ok(toml::from_str(contents)?),
        "json" => Ok(serde_json::from_str(contents)?),
        other => Err(ConfigError::UnsupportedFormat(other.to_string())),
    }
}

/// Apply `VIGIL_*` overrides read through `lookup`.
///
/// `load` passes `std::env::var`; tests pass a map.
pub fn apply_overrides<F>(config: &mut VigilConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut applied = Vec::new();
    let mut note = |key: &'static str| applied.push(key);

    if let Some(url) = lookup("VIGIL_BASE_URL") {
        config.client.base_url = url;
        note("VIGIL_BASE_URL");
    }
    if let Some(ms) = parse_var::<u64, _>(&lookup, "VIGIL_TIMEOUT_MS")? {
        config.client.timeout = Duration::from_millis(ms);
        note("VIGIL_TIMEOUT_MS");
    }
    if let Some(attempts) = parse_var(&lookup, "VIGIL_RETRY_ATTEMPTS")? {
        config.client.retry_attempts = attempts;
        note("VIGIL_RETRY_ATTEMPTS");
    }
    if let Some(ms) = parse_var::<u64, _>(&lookup, "VIGIL_RETRY_DELAY_MS")? {
        config.client.retry_delay = Duration::from_millis(ms);
        note("VIGIL_RETRY_DELAY_MS");
    }
    if let Some(threshold) = parse_var(&lookup, "VIGIL_FAILURE_THRESHOLD")? {
        breaker(config).failure_threshold = threshold;
        note("VIGIL_FAILURE_THRESHOLD");
    }
    if let Some(ms) = parse_var::<u64, _>(&lookup, "VIGIL_BREAKER_TIMEOUT_MS")? {
        breaker(config).timeout_threshold = Duration::from_millis(ms);
        note("VIGIL_BREAKER_TIMEOUT_MS");
    }
    if let Some(ms) = parse_var::<u64, _>(&lookup, "VIGIL_RETENTION_MS")? {
        config.monitor.retention = Duration::from_millis(ms);
        note("VIGIL_RETENTION_MS");
    }
    if let Some(filter) = lookup("VIGIL_LOG_FILTER") {
        config.logging.filter = filter;
        note("VIGIL_LOG_FILTER");
    }
    if let Some(json) = lookup("VIGIL_LOG_JSON") {
        config.logging.json = parse_bool("VIGIL_LOG_JSON", &json)?;
        note("VIGIL_LOG_JSON");
    }

    if !applied.is_empty() {
        tracing::info!(overrides = ?applied, "configuration_env_overrides_applied");
    }
    Ok(())
}

fn breaker(config: &mut VigilConfig) -> &mut CircuitBreakerConfig {
    config.client.circuit_breaker.get_or_insert_with(CircuitBreakerConfig::default)
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| {
            value.trim().parse::<T>().map_err(|err| ConfigError::InvalidEnv {
                key: key.to_string(),
                reason: err.to_string(),
                value,
            })
        })
        .transpose()
}

/// Accepts `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive).
fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            key: key.to_string(),
            value: value.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}
