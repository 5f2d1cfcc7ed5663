//! Circuit breaker guarding a single protected resource.
//!
//! The breaker counts failures of the operations it executes and, once the
//! failure threshold is reached, fails fast (or serves a fallback) until the
//! timeout threshold has elapsed. The first call after that is a single
//! HALF_OPEN trial: success closes the circuit, failure reopens it.
//!
//! All state lives behind one `parking_lot` mutex that is never held across
//! an `.await`, so racing callers cannot both win the trial.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::{AppError, AppResult};
use crate::time::{Clock, SystemClock};
use crate::utils::serde::{duration_millis, option_duration_millis};

/// Substitute result served while the circuit refuses calls.
pub type Fallback<T> = Arc<dyn Fn() -> BoxFuture<'static, AppResult<T>> + Send + Sync>;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Calls flow through and failures are counted
    Closed,
    /// Calls are rejected until the timeout threshold elapses
    Open,
    /// A single trial call is probing the resource
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Number of failures before opening the circuit
    pub failure_threshold: u32,
    /// Time to wait after the last failure before allowing a trial call
    #[serde(with = "duration_millis")]
    pub timeout_threshold: Duration,
    /// Failures further apart than this do not accumulate while CLOSED.
    /// `Duration::ZERO` disables the window.
    #[serde(with = "duration_millis")]
    pub monitoring_period: Duration,
    /// Optional deadline applied to every protected call
    #[serde(with = "option_duration_millis")]
    pub call_timeout: Option<Duration>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout_threshold: Duration::from_secs(60),
            monitoring_period: Duration::from_secs(60),
            call_timeout: None,
        }
    }
}

impl CircuitBreakerConfig {
    /// Validate the configuration
    pub fn validate(&self) -> AppResult<()> {
        if self.failure_threshold == 0 {
            return Err(AppError::configuration(
                "circuit_breaker.failure_threshold",
                "failure_threshold must be greater than 0",
            ));
        }

        if self.timeout_threshold.is_zero() {
            return Err(AppError::configuration(
                "circuit_breaker.timeout_threshold",
                "timeout_threshold must be greater than 0",
            ));
        }

        if self.call_timeout.is_some_and(|limit| limit.is_zero()) {
            return Err(AppError::configuration(
                "circuit_breaker.call_timeout",
                "call_timeout must be greater than 0 when set",
            ));
        }

        Ok(())
    }
}

/// Read-only snapshot returned by [`CircuitBreaker::get_status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerStatus {
    pub resource: String,
    pub state: CircuitState,
    pub failures: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub rejected_calls: u64,
    pub fallback_calls: u64,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failures: u32,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    trial_in_flight: bool,
    total_calls: u64,
    successful_calls: u64,
    failed_calls: u64,
    rejected_calls: u64,
    fallback_calls: u64,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: 0,
            last_failure: None,
            last_failure_at: None,
            trial_in_flight: false,
            total_calls: 0,
            successful_calls: 0,
            failed_calls: 0,
            rejected_calls: 0,
            fallback_calls: 0,
        }
    }
}

/// Builder for [`CircuitBreaker`].
pub struct CircuitBreakerBuilder<T, C: Clock = SystemClock> {
    resource: String,
    config: CircuitBreakerConfig,
    fallback: Option<Fallback<T>>,
    clock: C,
}

impl<T, C: Clock> CircuitBreakerBuilder<T, C> {
    /// Replace the whole configuration.
    pub fn config(mut self, config: CircuitBreakerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn timeout_threshold(mut self, timeout: Duration) -> Self {
        self.config.timeout_threshold = timeout;
        self
    }

    pub fn monitoring_period(mut self, period: Duration) -> Self {
        self.config.monitoring_period = period;
        self
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.config.call_timeout = Some(timeout);
        self
    }

    /// Serve `fallback` instead of failing while the circuit is open.
    pub fn fallback<F, Fut>(mut self, fallback: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AppResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let fallback: Fallback<T> =
            Arc::new(move || -> BoxFuture<'static, AppResult<T>> { Box::pin(fallback()) });
        self.fallback = Some(fallback);
        self
    }

    /// Set a custom clock for the circuit breaker (useful for testing)
    pub fn clock<C2: Clock>(self, clock: C2) -> CircuitBreakerBuilder<T, C2> {
        CircuitBreakerBuilder {
            resource: self.resource,
            config: self.config,
            fallback: self.fallback,
            clock,
        }
    }

    pub fn build(self) -> AppResult<CircuitBreaker<T, C>> {
        self.config.validate()?;

        Ok(CircuitBreaker {
            resource: Arc::from(self.resource),
            config: self.config,
            fallback: self.fallback,
            state: Arc::new(Mutex::new(BreakerState::new())),
            clock: Arc::new(self.clock),
        })
    }
}

/// Circuit breaker for operations yielding `T`.
///
/// Clones share state; hand a clone to every caller of the same resource.
pub struct CircuitBreaker<T, C: Clock = SystemClock> {
    resource: Arc<str>,
    config: CircuitBreakerConfig,
    fallback: Option<Fallback<T>>,
    state: Arc<Mutex<BreakerState>>,
    clock: Arc<C>,
}

impl<T, C: Clock> fmt::Debug for CircuitBreaker<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CircuitBreaker")
            .field("resource", &self.resource)
            .field("config", &self.config)
            .field("state", &state.state)
            .field("failures", &state.failures)
            .field("has_fallback", &self.fallback.is_some())
            .finish()
    }
}

impl<T, C: Clock> Clone for CircuitBreaker<T, C> {
    fn clone(&self) -> Self {
        Self {
            resource: Arc::clone(&self.resource),
            config: self.config.clone(),
            fallback: self.fallback.clone(),
            state: Arc::clone(&self.state),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<T> CircuitBreaker<T, SystemClock> {
    /// Create a circuit breaker for `resource` using the system clock
    pub fn new<R: Into<String>>(resource: R, config: CircuitBreakerConfig) -> AppResult<Self> {
        Self::builder(resource).config(config).build()
    }

    /// Create a circuit breaker using the builder pattern
    pub fn builder<R: Into<String>>(resource: R) -> CircuitBreakerBuilder<T> {
        CircuitBreakerBuilder {
            resource: resource.into(),
            config: CircuitBreakerConfig::default(),
            fallback: None,
            clock: SystemClock,
        }
    }
}

enum Admission {
    Allowed { trial: bool },
    Rejected,
}

impl<T, C: Clock> CircuitBreaker<T, C> {
    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Execute an operation with circuit breaker protection
    ///
    /// While OPEN (and the timeout threshold has not elapsed) the operation
    /// is not invoked: the fallback is served if configured, otherwise a
    /// `CircuitOpen` error is returned. Errors of the operation are
    /// propagated unchanged, except when the failure opened the circuit and a
    /// fallback exists.
    #[instrument(skip(self, operation), fields(resource = %self.resource))]
    pub async fn execute<F, Fut>(&self, operation: F) -> AppResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let trial = match self.admit() {
            Admission::Allowed { trial } => trial,
            Admission::Rejected => return self.reject().await,
        };

        let mut guard = CallGuard { breaker: self, trial, settled: false };

        let outcome = match self.config.call_timeout {
            Some(limit) => match tokio::time::timeout(limit, operation()).await {
                Ok(result) => result,
                Err(_) => Err(AppError::timeout(limit)
                    .with_context("resource", self.resource.as_ref())),
            },
            None => operation().await,
        };

        guard.settled = true;
        match outcome {
            Ok(value) => {
                self.on_success(trial);
                Ok(value)
            }
            Err(error) => {
                let opened = self.on_failure(trial);
                warn!(
                    resource = %self.resource,
                    error = %error,
                    opened,
                    "circuit_breaker_call_failed"
                );
                match (&self.fallback, opened) {
                    (Some(fallback), true) => {
                        self.state.lock().fallback_calls += 1;
                        fallback().await
                    }
                    _ => Err(error),
                }
            }
        }
    }

    /// Read-only snapshot of the breaker.
    pub fn get_status(&self) -> CircuitBreakerStatus {
        let state = self.state.lock();
        CircuitBreakerStatus {
            resource: self.resource.to_string(),
            state: state.state,
            failures: state.failures,
            last_failure_time: state.last_failure_at,
            total_calls: state.total_calls,
            successful_calls: state.successful_calls,
            failed_calls: state.failed_calls,
            rejected_calls: state.rejected_calls,
            fallback_calls: state.fallback_calls,
        }
    }

    /// Current state without side effects.
    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    /// Force the breaker back to CLOSED and clear counters.
    pub fn reset(&self) {
        *self.state.lock() = BreakerState::new();
        info!(resource = %self.resource, "circuit_breaker_reset");
    }

    fn admit(&self) -> Admission {
        let now = self.clock.now();
        let mut state = self.state.lock();

        let admission = match state.state {
            CircuitState::Closed => Admission::Allowed { trial: false },
            CircuitState::Open => {
                let elapsed = state
                    .last_failure
                    .map(|at| now.saturating_duration_since(at))
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.config.timeout_threshold {
                    state.state = CircuitState::HalfOpen;
                    state.trial_in_flight = true;
                    info!(resource = %self.resource, "circuit_breaker_half_open");
                    Admission::Allowed { trial: true }
                } else {
                    Admission::Rejected
                }
            }
            CircuitState::HalfOpen if state.trial_in_flight => Admission::Rejected,
            CircuitState::HalfOpen => {
                state.trial_in_flight = true;
                Admission::Allowed { trial: true }
            }
        };

        match admission {
            Admission::Allowed { .. } => state.total_calls += 1,
            Admission::Rejected => state.rejected_calls += 1,
        }
        admission
    }

    async fn reject(&self) -> AppResult<T> {
        debug!(resource = %self.resource, "circuit_breaker_rejected_call");
        match &self.fallback {
            Some(fallback) => {
                self.state.lock().fallback_calls += 1;
                fallback().await
            }
            None => Err(AppError::circuit_open(self.resource.as_ref())),
        }
    }

    fn on_success(&self, trial: bool) {
        let mut state = self.state.lock();
        state.successful_calls += 1;

        if trial {
            state.trial_in_flight = false;
        }

        match state.state {
            CircuitState::HalfOpen if trial => {
                state.state = CircuitState::Closed;
                state.failures = 0;
                info!(resource = %self.resource, "circuit_breaker_closed");
            }
            CircuitState::Closed => state.failures = 0,
            // Calls admitted before the circuit opened do not move it.
            _ => {}
        }
    }

    /// Returns whether this failure opened the circuit.
    fn on_failure(&self, trial: bool) -> bool {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.failed_calls += 1;

        if trial {
            state.trial_in_flight = false;
        } else if state.state != CircuitState::Closed {
            debug!(
                resource = %self.resource,
                state = %state.state,
                "circuit_breaker_late_failure"
            );
            return false;
        }

        let window = self.config.monitoring_period;
        if state.state == CircuitState::Closed && !window.is_zero() {
            let stale = state
                .last_failure
                .is_some_and(|previous| now.saturating_duration_since(previous) > window);
            if stale {
                state.failures = 0;
            }
        }

        state.failures = state.failures.saturating_add(1);
        state.last_failure = Some(now);
        state.last_failure_at = Some(self.clock.utc_now());

        let should_open = match state.state {
            CircuitState::HalfOpen => trial,
            CircuitState::Closed => state.failures >= self.config.failure_threshold,
            CircuitState::Open => false,
        };

        if should_open {
            state.state = CircuitState::Open;
            warn!(
                resource = %self.resource,
                failures = state.failures,
                "circuit_breaker_opened"
            );
        }
        should_open
    }
}

/// Settles an admitted call if its future is dropped before completion.
struct CallGuard<'a, T, C: Clock> {
    breaker: &'a CircuitBreaker<T, C>,
    trial: bool,
    settled: bool,
}

impl<T, C: Clock> Drop for CallGuard<'_, T, C> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            warn!(resource = %self.breaker.resource, "circuit_breaker_trial_cancelled");
            self.breaker.on_failure(true);
        }
    }
}
