//! Recovery actions: reversible remediation steps with ordering dependencies.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use vigil_common::AppResult;

type ExecuteFn = Arc<dyn Fn() -> BoxFuture<'static, AppResult<bool>> + Send + Sync>;
type RollbackFn = Arc<dyn Fn() -> BoxFuture<'static, AppResult<()>> + Send + Sync>;

/// One step of a recovery run.
///
/// `execute` answering `Ok(false)`, returning an error, panicking or timing
/// out all count as failure of the step.
///
/// ```rust
/// use vigil_core::recovery::RecoveryAction;
///
/// let restart = RecoveryAction::new("restart_worker", || async { Ok(true) })
///     .depends_on("flush_queue")
///     .with_rollback(|| async { Ok(()) });
///
/// assert_eq!(restart.dependencies(), ["flush_queue"]);
/// assert!(restart.has_rollback());
/// ```
#[derive(Clone)]
pub struct RecoveryAction {
    name: String,
    dependencies: Vec<String>,
    execute: ExecuteFn,
    rollback: Option<RollbackFn>,
}

impl RecoveryAction {
    pub fn new<N, F, Fut>(name: N, execute: F) -> Self
    where
        N: Into<String>,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AppResult<bool>> + Send + 'static,
    {
        let execute: ExecuteFn =
            Arc::new(move || -> BoxFuture<'static, AppResult<bool>> { Box::pin(execute()) });
        Self { name: name.into(), dependencies: Vec::new(), execute, rollback: None }
    }

    /// Require `name` to run (and succeed) before this action.
    pub fn depends_on<N: Into<String>>(mut self, name: N) -> Self {
        let name = name.into();
        if !self.dependencies.contains(&name) {
            self.dependencies.push(name);
        }
        self
    }

    pub fn with_dependencies<I, N>(self, names: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        names.into_iter().fold(self, |action, name| action.depends_on(name))
    }

    /// Undo step run when a later action fails.
    pub fn with_rollback<F, Fut>(mut self, rollback: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AppResult<()>> + Send + 'static,
    {
        let rollback: RollbackFn =
            Arc::new(move || -> BoxFuture<'static, AppResult<()>> { Box::pin(rollback()) });
        self.rollback = Some(rollback);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn has_rollback(&self) -> bool {
        self.rollback.is_some()
    }

    pub(crate) fn execute(&self) -> BoxFuture<'static, AppResult<bool>> {
        (self.execute)()
    }

    pub(crate) fn rollback(&self) -> Option<BoxFuture<'static, AppResult<()>>> {
        self.rollback.as_ref().map(|rollback| rollback())
    }
}

impl fmt::Debug for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryAction")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("has_rollback", &self.has_rollback())
            .finish_non_exhaustive()
    }
}
