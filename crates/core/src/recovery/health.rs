//! Health checks and the report produced by running them.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use vigil_common::AppResult;

type CheckFn = Arc<dyn Fn() -> BoxFuture<'static, AppResult<bool>> + Send + Sync>;

/// A named boolean probe of a dependency.
///
/// A check that returns an error, panics or exceeds the configured timeout is
/// reported as failed.
#[derive(Clone)]
pub struct HealthCheck {
    name: String,
    check: CheckFn,
}

impl HealthCheck {
    /// Probe that cannot fail other than by answering `false`.
    pub fn new<N, F, Fut>(name: N, check: F) -> Self
    where
        N: Into<String>,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let check: CheckFn = Arc::new(move || -> BoxFuture<'static, AppResult<bool>> {
            let fut = check();
            Box::pin(async move { Ok(fut.await) })
        });
        Self { name: name.into(), check }
    }

    /// Probe whose errors count as an unhealthy answer.
    pub fn fallible<N, F, Fut>(name: N, check: F) -> Self
    where
        N: Into<String>,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AppResult<bool>> + Send + 'static,
    {
        let check: CheckFn =
            Arc::new(move || -> BoxFuture<'static, AppResult<bool>> { Box::pin(check()) });
        Self { name: name.into(), check }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn run(&self) -> BoxFuture<'static, AppResult<bool>> {
        (self.check)()
    }
}

impl fmt::Debug for HealthCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthCheck").field("name", &self.name).finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallHealth {
    Healthy,
    Degraded,
    Unhealthy,
}

impl OverallHealth {
    /// Every check passing is healthy, every check failing is unhealthy.
    pub fn from_counts(passed: usize, failed: usize) -> Self {
        match (passed, failed) {
            (_, 0) => Self::Healthy,
            (0, _) => Self::Unhealthy,
            _ => Self::Degraded,
        }
    }
}

impl fmt::Display for OverallHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub overall_health: OverallHealth,
    /// Names of failed checks, in registration order
    pub failed_checks: Vec<String>,
    pub passed_checks: Vec<String>,
    /// Recovery actions associated with the failed checks
    pub recommendations: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.overall_health == OverallHealth::Healthy
    }
}
