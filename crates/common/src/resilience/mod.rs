//! Resilience patterns for fault tolerance
//!
//! - **Circuit Breaker**: stops calling a failing resource after repeated
//!   failures and probes it again once a timeout has elapsed
//! - **Retry Logic**: bounded retries with fixed, linear or exponential
//!   backoff, gated by a [`RetryPolicy`]
//!
//! Both are generic library pieces; the resilient HTTP client in
//! `vigil-infra` composes them as retry → breaker → timeout.

pub mod circuit_breaker;
pub mod retry;

// Re-export circuit breaker types
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerBuilder, CircuitBreakerConfig, CircuitBreakerStatus,
    CircuitState, Fallback,
};
// Re-export retry types
pub use retry::{
    policies, BackoffStrategy, RetryConfig, RetryConfigBuilder, RetryDecision, RetryError,
    RetryExecutor, RetryPolicy,
};
