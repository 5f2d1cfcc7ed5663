//! Resilient HTTP client.

pub mod auth;
pub mod cache;
pub mod options;
pub mod resilient;

pub use auth::{AccessTokenProvider, StaticToken};
pub use cache::{CachedResponse, ResponseCache};
pub use options::{CacheConfig, ClientConfig, ClientConfigBuilder, RequestOptions};
pub use resilient::ResilientClient;
