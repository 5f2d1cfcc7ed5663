//! Retry executor with pluggable backoff and retry policies.
//!
//! A `RetryConfig` describes how many *additional* attempts are made after
//! the first one and how long to wait between them. Whether a given error is
//! worth retrying is decided by a [`RetryPolicy`], so the same executor
//! serves network clients (retry only transport failures) and generic
//! callers (retry anything classified as retryable).

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::error::{AppError, AppResult};
use crate::utils::serde::duration_millis;

/// Errors that can occur during retry operations
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every allowed attempt failed with a retryable error
    #[error("all {attempts} attempts failed")]
    Exhausted {
        attempts: u32,
        #[source]
        last: E,
    },

    /// The policy refused to retry the error
    #[error("operation failed with non-retryable error after {attempts} attempt(s)")]
    NonRetryable {
        #[source]
        source: E,
        attempts: u32,
    },
}

impl<E> RetryError<E> {
    /// Number of attempts made, including the first one.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } | Self::NonRetryable { attempts, .. } => *attempts,
        }
    }

    /// The last error returned by the operation.
    pub fn into_inner(self) -> E {
        match self {
            Self::Exhausted { last, .. } => last,
            Self::NonRetryable { source, .. } => source,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}

/// Trait for determining whether an error should be retried
pub trait RetryPolicy<E> {
    /// Decide whether to retry after `attempt` (1-based) failed with `error`.
    fn should_retry(&self, error: &E, attempt: u32) -> RetryDecision;
}

/// Decision for whether to retry an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the operation with the configured backoff delay
    Retry,
    /// Retry the operation with a custom delay
    RetryAfter(Duration),
    /// Don't retry the operation
    Stop,
}

/// How the delay grows between attempts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// `retry_delay` before every retry
    #[default]
    Fixed,
    /// `retry_delay * n` before the n-th retry
    Linear,
    /// `retry_delay * 2^(n-1)` before the n-th retry
    Exponential,
}

impl BackoffStrategy {
    /// Delay before the `retry`-th retry (1-based), capped at `max_delay`.
    pub fn calculate_delay(&self, base: Duration, retry: u32, max_delay: Duration) -> Duration {
        let retry = retry.max(1);
        let delay = match self {
            BackoffStrategy::Fixed => base,
            BackoffStrategy::Linear => base.saturating_mul(retry),
            BackoffStrategy::Exponential => {
                let factor = 2_u32.checked_pow(retry - 1).unwrap_or(u32::MAX);
                base.saturating_mul(factor)
            }
        };
        delay.min(max_delay)
    }
}

impl fmt::Display for BackoffStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackoffStrategy::Fixed => write!(f, "fixed"),
            BackoffStrategy::Linear => write!(f, "linear"),
            BackoffStrategy::Exponential => write!(f, "exponential"),
        }
    }
}

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Additional attempts after the first one (0 disables retrying)
    pub retry_attempts: u32,
    /// Base delay between attempts
    #[serde(with = "duration_millis")]
    pub retry_delay: Duration,
    pub backoff: BackoffStrategy,
    /// Upper bound for any single delay
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            retry_delay: Duration::from_millis(1000),
            backoff: BackoffStrategy::Fixed,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Create a configuration builder
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::new()
    }

    /// Configuration that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self { retry_attempts: 0, ..Self::default() }
    }

    /// Total attempts including the first one.
    pub fn max_attempts(&self) -> u32 {
        self.retry_attempts.saturating_add(1)
    }

    /// Delay before the `retry`-th retry (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.backoff.calculate_delay(self.retry_delay, retry, self.max_delay)
    }

    /// Validate the configuration
    pub fn validate(&self) -> AppResult<()> {
        if self.max_delay < self.retry_delay {
            return Err(AppError::configuration(
                "retry.max_delay",
                format!(
                    "max_delay ({:?}) must not be shorter than retry_delay ({:?})",
                    self.max_delay, self.retry_delay
                ),
            ));
        }

        Ok(())
    }
}

/// Builder for RetryConfig with fluent API
#[derive(Debug, Default)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl RetryConfigBuilder {
    pub fn new() -> Self {
        Self { config: RetryConfig::default() }
    }

    pub fn retry_attempts(mut self, attempts: u32) -> Self {
        self.config.retry_attempts = attempts;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay = delay;
        self
    }

    pub fn fixed_backoff(mut self) -> Self {
        self.config.backoff = BackoffStrategy::Fixed;
        self
    }

    pub fn linear_backoff(mut self) -> Self {
        self.config.backoff = BackoffStrategy::Linear;
        self
    }

    pub fn exponential_backoff(mut self) -> Self {
        self.config.backoff = BackoffStrategy::Exponential;
        self
    }

    pub fn build(self) -> AppResult<RetryConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// The main retry executor
#[derive(Debug, Clone)]
pub struct RetryExecutor<P> {
    config: RetryConfig,
    policy: P,
}

impl<P> RetryExecutor<P> {
    /// Create a new retry executor with the given configuration and policy
    pub fn new(config: RetryConfig, policy: P) -> Self {
        Self { config, policy }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Execute an operation with retry logic
    ///
    /// The operation runs at most `retry_attempts + 1` times. Delays are
    /// driven by `tokio::time`, so tests can use a paused runtime clock.
    #[instrument(skip(self, operation), fields(retry_attempts = self.config.retry_attempts))]
    pub async fn execute<F, Fut, T, E>(&self, mut operation: F) -> Result<T, RetryError<E>>
    where
        P: RetryPolicy<E>,
        E: fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.config.max_attempts();
        let mut attempt = 1;

        loop {
            debug!(attempt, max_attempts, "retry_attempt_started");

            let error = match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "retry_succeeded");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            let delay = match self.policy.should_retry(&error, attempt) {
                RetryDecision::Stop => {
                    debug!(attempt, error = %error, "retry_policy_stopped");
                    return Err(RetryError::NonRetryable { source: error, attempts: attempt });
                }
                _ if attempt >= max_attempts => {
                    warn!(attempts = attempt, error = %error, "retry_attempts_exhausted");
                    return Err(RetryError::Exhausted { attempts: attempt, last: error });
                }
                RetryDecision::Retry => self.config.delay_for(attempt),
                RetryDecision::RetryAfter(custom) => custom,
            };

            warn!(attempt, delay_ms = delay.as_millis() as u64, error = %error, "retry_scheduled");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Pre-defined retry policies for common scenarios
pub mod policies {
    use super::*;
    use crate::error::ErrorClassification;

    /// Always retry policy - retries on any error
    #[derive(Debug, Clone, Copy, Default)]
    pub struct AlwaysRetry;

    impl<E> RetryPolicy<E> for AlwaysRetry {
        fn should_retry(&self, _error: &E, _attempt: u32) -> RetryDecision {
            RetryDecision::Retry
        }
    }

    /// Never retry policy - never retries
    #[derive(Debug, Clone, Copy, Default)]
    pub struct NeverRetry;

    impl<E> RetryPolicy<E> for NeverRetry {
        fn should_retry(&self, _error: &E, _attempt: u32) -> RetryDecision {
            RetryDecision::Stop
        }
    }

    /// Retries errors that classify themselves as retryable, honouring any
    /// `retry_after` hint.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct RetryClassified;

    impl<E: ErrorClassification> RetryPolicy<E> for RetryClassified {
        fn should_retry(&self, error: &E, _attempt: u32) -> RetryDecision {
            if !error.is_retryable() {
                return RetryDecision::Stop;
            }
            match error.retry_after() {
                Some(delay) => RetryDecision::RetryAfter(delay),
                None => RetryDecision::Retry,
            }
        }
    }

    /// Predicate-based retry policy
    #[derive(Debug, Clone)]
    pub struct PredicateRetry<F> {
        predicate: F,
    }

    impl<F> PredicateRetry<F> {
        pub fn new(predicate: F) -> Self {
            Self { predicate }
        }
    }

    impl<F, E> RetryPolicy<E> for PredicateRetry<F>
    where
        F: Fn(&E, u32) -> bool,
    {
        fn should_retry(&self, error: &E, attempt: u32) -> RetryDecision {
            if (self.predicate)(error, attempt) {
                RetryDecision::Retry
            } else {
                RetryDecision::Stop
            }
        }
    }
}
