//! Tracing setup for binaries embedding the Vigil crates.

pub mod logging;

pub use logging::{init_tracing, LoggingConfig};

/// Failure to install the tracing subscriber.
#[derive(Debug, thiserror::Error)]
pub enum ObservabilityError {
    #[error("invalid log filter '{filter}': {message}")]
    InvalidFilter { filter: String, message: String },
}
