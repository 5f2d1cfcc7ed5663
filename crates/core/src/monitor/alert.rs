//! Alert rules and the actions they trigger.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use vigil_common::{AppResult, ErrorKind};

use super::metric::ErrorMetric;

/// Callback run when an alert rule fires.
///
/// Failures are reported back to the monitor, which logs them; they never
/// reach the code that recorded the error.
#[async_trait]
pub trait AlertAction: Send + Sync {
    async fn on_alert(&self, metric: &ErrorMetric) -> AppResult<()>;
}

/// Adapts an async closure into an [`AlertAction`].
pub struct FnAlertAction<F>(F);

#[async_trait]
impl<F, Fut> AlertAction for FnAlertAction<F>
where
    F: Fn(ErrorMetric) -> Fut + Send + Sync,
    Fut: Future<Output = AppResult<()>> + Send,
{
    async fn on_alert(&self, metric: &ErrorMetric) -> AppResult<()> {
        (self.0)(metric.clone()).await
    }
}

/// Fire `action` when `threshold` errors of `error_type` occur within
/// `time_window`.
#[derive(Clone)]
pub struct AlertRule {
    name: String,
    error_type: ErrorKind,
    threshold: usize,
    time_window: Duration,
    action: Arc<dyn AlertAction>,
}

impl AlertRule {
    pub fn new(
        error_type: ErrorKind,
        threshold: usize,
        time_window: Duration,
        action: impl AlertAction + 'static,
    ) -> Self {
        Self {
            name: format!("{error_type}>={threshold}"),
            error_type,
            threshold: threshold.max(1),
            time_window,
            action: Arc::new(action),
        }
    }

    /// Rule backed by an async closure receiving a snapshot of the metric.
    pub fn from_fn<F, Fut>(
        error_type: ErrorKind,
        threshold: usize,
        time_window: Duration,
        action: F,
    ) -> Self
    where
        F: Fn(ErrorMetric) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AppResult<()>> + Send + 'static,
    {
        Self::new(error_type, threshold, time_window, FnAlertAction(action))
    }

    /// Override the generated rule name used in logs.
    pub fn named<N: Into<String>>(mut self, name: N) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn error_type(&self) -> ErrorKind {
        self.error_type
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn time_window(&self) -> Duration {
        self.time_window
    }

    pub(crate) fn action(&self) -> Arc<dyn AlertAction> {
        Arc::clone(&self.action)
    }
}

impl fmt::Debug for AlertRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlertRule")
            .field("name", &self.name)
            .field("error_type", &self.error_type)
            .field("threshold", &self.threshold)
            .field("time_window", &self.time_window)
            .finish_non_exhaustive()
    }
}
