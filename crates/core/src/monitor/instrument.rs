//! Helpers that record the errors of async operations in a monitor.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use vigil_common::{AppError, AppResult, Clock, SystemClock};

use super::ErrorMonitor;

/// Await `fut`, recording its error (if any) before handing it back.
pub async fn monitored<T, C, F>(monitor: &ErrorMonitor<C>, fut: F) -> AppResult<T>
where
    C: Clock,
    F: Future<Output = AppResult<T>>,
{
    match fut.await {
        Ok(value) => Ok(value),
        Err(err) => {
            monitor.record_error(&err).await;
            Err(err)
        }
    }
}

/// Reusable wrapper tagging recorded errors with an operation name.
pub struct Monitored<C: Clock = SystemClock> {
    monitor: Arc<ErrorMonitor<C>>,
    operation: Option<String>,
}

impl<C: Clock> Clone for Monitored<C> {
    fn clone(&self) -> Self {
        Self { monitor: Arc::clone(&self.monitor), operation: self.operation.clone() }
    }
}

impl<C: Clock> Monitored<C> {
    pub fn new(monitor: Arc<ErrorMonitor<C>>) -> Self {
        Self { monitor, operation: None }
    }

    /// Add `operation=<name>` to the context of every recorded error.
    pub fn operation<N: Into<String>>(mut self, name: N) -> Self {
        self.operation = Some(name.into());
        self
    }

    pub fn monitor(&self) -> &Arc<ErrorMonitor<C>> {
        &self.monitor
    }

    pub async fn run<T, F>(&self, fut: F) -> AppResult<T>
    where
        F: Future<Output = AppResult<T>>,
    {
        match fut.await {
            Ok(value) => Ok(value),
            Err(err) => {
                let err = self.tag(err);
                self.monitor.record_error(&err).await;
                Err(err)
            }
        }
    }

    /// Turn an operation factory into one whose failures are recorded.
    pub fn wrap<T, F, Fut>(&self, f: F) -> impl Fn() -> BoxFuture<'static, AppResult<T>>
    where
        T: Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AppResult<T>> + Send + 'static,
    {
        let this = self.clone();
        let f = Arc::new(f);
        move || {
            let this = this.clone();
            let fut = f();
            Box::pin(async move { this.run(fut).await })
        }
    }

    fn tag(&self, err: AppError) -> AppError {
        match &self.operation {
            Some(name) if err.context_value("operation").is_none() => {
                err.with_context("operation", name.clone())
            }
            _ => err,
        }
    }
}
