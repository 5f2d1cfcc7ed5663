//! # Vigil Infrastructure
//!
//! I/O-bound pieces built on `vigil-common` and `vigil-core`.
//!
//! This crate contains:
//! - [`client::ResilientClient`]: retry, timeout, circuit breaking and an
//!   optional response cache over a [`http::Transport`]
//! - the `reqwest` transport adapter
//! - configuration loading from files and `VIGIL_*` environment variables
//! - tracing subscriber setup

pub mod client;
pub mod config;
pub mod http;
pub mod observability;

// Re-export commonly used items
pub use client::{ClientConfig, RequestOptions, ResilientClient};
pub use config::{ConfigError, VigilConfig};
pub use http::{ReqwestTransport, Transport, TransportError};
pub use observability::{init_tracing, LoggingConfig};
