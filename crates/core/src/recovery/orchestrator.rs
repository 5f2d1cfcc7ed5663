//! Health checking and dependency-ordered recovery with rollback.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};
use vigil_common::duration_millis;
use vigil_common::{AppError, AppResult, Clock, SystemClock};

use super::action::RecoveryAction;
use super::health::{HealthCheck, HealthReport, OverallHealth};
use super::history::{RecoveryAttempt, RecoveryHistory};
use crate::monitor::{AlertAction, ErrorMetric};

/// Configuration for [`RecoveryOrchestrator`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Budget for each health check
    #[serde(with = "duration_millis")]
    pub check_timeout: Duration,
    /// Budget for each action's execute and rollback
    #[serde(with = "duration_millis")]
    pub action_timeout: Duration,
    /// Number of attempts kept in history
    pub max_history: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            check_timeout: Duration::from_secs(5),
            action_timeout: Duration::from_secs(30),
            max_history: 100,
        }
    }
}

impl RecoveryConfig {
    pub fn validate(&self) -> AppResult<()> {
        if self.check_timeout.is_zero() {
            return Err(AppError::configuration(
                "recovery.check_timeout",
                "check_timeout must be greater than 0",
            ));
        }
        if self.action_timeout.is_zero() {
            return Err(AppError::configuration(
                "recovery.action_timeout",
                "action_timeout must be greater than 0",
            ));
        }
        if self.max_history == 0 {
            return Err(AppError::configuration(
                "recovery.max_history",
                "max_history must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Result of [`RecoveryOrchestrator::heal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealOutcome {
    pub report: HealthReport,
    /// `None` when everything was healthy and no recovery ran
    pub recovered: Option<bool>,
}

#[derive(Default)]
struct Registry {
    checks: Vec<HealthCheck>,
    actions: Vec<RecoveryAction>,
}

/// Runs health checks and recovery actions for one subsystem.
///
/// Registration is synchronous and validated: duplicate names and
/// dependency cycles are rejected without touching the registry. Recovery
/// runs are serialized; a second `execute_recovery` waits for the first.
pub struct RecoveryOrchestrator<C: Clock = SystemClock> {
    config: RecoveryConfig,
    clock: C,
    registry: RwLock<Registry>,
    history: Mutex<RecoveryHistory>,
    run_lock: tokio::sync::Mutex<()>,
}

impl RecoveryOrchestrator<SystemClock> {
    pub fn new(config: RecoveryConfig) -> AppResult<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> RecoveryOrchestrator<C> {
    pub fn with_clock(config: RecoveryConfig, clock: C) -> AppResult<Self> {
        config.validate()?;
        Ok(Self {
            history: Mutex::new(RecoveryHistory::new(config.max_history)),
            config,
            clock,
            registry: RwLock::new(Registry::default()),
            run_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    pub fn add_health_check(&self, check: HealthCheck) -> AppResult<()> {
        let mut registry = self.registry.write();
        if registry.checks.iter().any(|c| c.name() == check.name()) {
            return Err(AppError::configuration(
                "recovery.health_checks",
                format!("health check '{}' is already registered", check.name()),
            ));
        }
        debug!(check = %check.name(), "health_check_registered");
        registry.checks.push(check);
        Ok(())
    }

    /// Register `action`, rejecting it if its name is taken or if it would
    /// close a dependency cycle.
    ///
    /// Dependencies on actions that are not registered yet are accepted;
    /// they must be registered before recovery runs.
    pub fn add_recovery_action(&self, action: RecoveryAction) -> AppResult<()> {
        let mut registry = self.registry.write();
        if registry.actions.iter().any(|a| a.name() == action.name()) {
            return Err(AppError::configuration(
                "recovery.actions",
                format!("recovery action '{}' is already registered", action.name()),
            ));
        }
        if let Some(path) = find_cycle(&registry.actions, &action) {
            warn!(action = %action.name(), cycle = %path.join(" -> "), "recovery_action_rejected");
            return Err(AppError::configuration(
                "recovery.actions",
                format!("cyclic dependency: {}", path.join(" -> ")),
            )
            .with_context("action", action.name()));
        }
        debug!(
            action = %action.name(),
            dependencies = ?action.dependencies(),
            "recovery_action_registered"
        );
        registry.actions.push(action);
        Ok(())
    }

    pub fn health_check_names(&self) -> Vec<String> {
        self.registry.read().checks.iter().map(|c| c.name().to_string()).collect()
    }

    pub fn action_names(&self) -> Vec<String> {
        self.registry.read().actions.iter().map(|a| a.name().to_string()).collect()
    }

    /// Run every health check concurrently and summarize the results.
    #[instrument(skip(self))]
    pub async fn perform_health_check(&self) -> HealthReport {
        let (checks, actions) = {
            let registry = self.registry.read();
            (registry.checks.clone(), registry.actions.clone())
        };

        let check_timeout = self.config.check_timeout;
        let outcomes = join_all(checks.iter().map(|check| {
            let probe = check.run();
            async move {
                match timeout(check_timeout, AssertUnwindSafe(probe).catch_unwind()).await {
                    Ok(Ok(Ok(healthy))) => {
                        if !healthy {
                            warn!(check = %check.name(), "health_check_failed");
                        }
                        healthy
                    }
                    Ok(Ok(Err(err))) => {
                        warn!(check = %check.name(), error = %err, "health_check_failed");
                        false
                    }
                    Ok(Err(_)) => {
                        warn!(check = %check.name(), "health_check_panicked");
                        false
                    }
                    Err(_) => {
                        warn!(
                            check = %check.name(),
                            timeout_ms = %check_timeout.as_millis(),
                            "health_check_timed_out"
                        );
                        false
                    }
                }
            }
        }))
        .await;

        let mut passed_checks = Vec::new();
        let mut failed_checks = Vec::new();
        for (check, healthy) in checks.iter().zip(outcomes) {
            if healthy {
                passed_checks.push(check.name().to_string());
            } else {
                failed_checks.push(check.name().to_string());
            }
        }

        let recommendations = recommend(&actions, &failed_checks);
        let overall_health = OverallHealth::from_counts(passed_checks.len(), failed_checks.len());
        info!(
            overall = %overall_health,
            passed = passed_checks.len(),
            failed = failed_checks.len(),
            "health_check_completed"
        );

        HealthReport {
            overall_health,
            failed_checks,
            passed_checks,
            recommendations,
            checked_at: self.clock.utc_now(),
        }
    }

    /// Execute every registered action in dependency order.
    ///
    /// The first failing action stops the run; rollbacks of the actions that
    /// already succeeded then run in reverse order. Never returns an error:
    /// the outcome is the returned flag plus the recorded attempt.
    pub async fn execute_recovery<R: Into<String>>(&self, reason: R) -> bool {
        let _running = self.run_lock.lock().await;
        self.run_recovery(reason.into()).await
    }

    /// Run recovery unless a run is already in progress.
    ///
    /// Returns `None` without waiting when another run holds the lock, which
    /// includes the case of being called from inside that run.
    pub async fn try_execute_recovery<R: Into<String>>(&self, reason: R) -> Option<bool> {
        let _running = self.run_lock.try_lock().ok()?;
        Some(self.run_recovery(reason.into()).await)
    }

    #[instrument(skip_all)]
    async fn run_recovery(&self, reason: String) -> bool {
        let started = self.clock.now();
        let mut attempt = RecoveryAttempt::started(reason, self.clock.utc_now());
        let actions = self.registry.read().actions.clone();

        info!(reason = %attempt.reason, actions = actions.len(), "recovery_started");

        match execution_order(&actions) {
            Err(err) => {
                warn!(error = %err, "recovery_plan_invalid");
                attempt.error = Some(err.to_string());
            }
            Ok(order) => {
                let mut succeeded: Vec<&RecoveryAction> = Vec::with_capacity(order.len());
                for action in order.into_iter().map(|idx| &actions[idx]) {
                    attempt.actions.push(action.name().to_string());
                    match self.run_action(action).await {
                        Ok(()) => succeeded.push(action),
                        Err(failure) => {
                            warn!(action = %action.name(), error = %failure, "recovery_action_failed");
                            attempt.failed_action = Some(action.name().to_string());
                            attempt.error = Some(failure);
                            break;
                        }
                    }
                }

                if attempt.failed_action.is_none() {
                    attempt.success = true;
                } else {
                    for action in succeeded.into_iter().rev() {
                        if self.run_rollback(action).await {
                            attempt.rolled_back.push(action.name().to_string());
                        }
                    }
                }
            }
        }

        attempt.duration = self.clock.now().saturating_duration_since(started);
        let success = attempt.success;
        if success {
            info!(
                reason = %attempt.reason,
                duration_ms = %attempt.duration.as_millis(),
                "recovery_succeeded"
            );
        } else {
            warn!(
                reason = %attempt.reason,
                failed_action = ?attempt.failed_action,
                rolled_back = ?attempt.rolled_back,
                "recovery_failed"
            );
        }
        self.history.lock().push(attempt);
        success
    }

    /// Check health and run recovery when anything failed.
    pub async fn heal(&self) -> HealOutcome {
        let report = self.perform_health_check().await;
        if report.is_healthy() {
            return HealOutcome { report, recovered: None };
        }
        let reason = format!("health check failed: {}", report.failed_checks.join(", "));
        let recovered = self.execute_recovery(reason).await;
        HealOutcome { report, recovered: Some(recovered) }
    }

    /// Last `n` recovery attempts, newest first.
    pub fn get_recovery_history(&self, n: usize) -> Vec<RecoveryAttempt> {
        self.history.lock().latest(n)
    }

    /// (attempts, successes) over the retained history
    pub fn history_counts(&self) -> (usize, usize) {
        let history = self.history.lock();
        (history.len(), history.iter().filter(|a| a.success).count())
    }

    /// Adapter that runs recovery when an alert rule fires.
    pub fn alert_action(self: &Arc<Self>) -> RecoveryAlertAction<C> {
        RecoveryAlertAction { orchestrator: Arc::clone(self) }
    }

    async fn run_action(&self, action: &RecoveryAction) -> Result<(), String> {
        let budget = self.config.action_timeout;
        match timeout(budget, AssertUnwindSafe(action.execute()).catch_unwind()).await {
            Ok(Ok(Ok(true))) => {
                debug!(action = %action.name(), "recovery_action_succeeded");
                Ok(())
            }
            Ok(Ok(Ok(false))) => Err("action reported failure".to_string()),
            Ok(Ok(Err(err))) => Err(err.to_string()),
            Ok(Err(_)) => Err("action panicked".to_string()),
            Err(_) => Err(format!("action timed out after {}ms", budget.as_millis())),
        }
    }

    /// Returns whether a rollback was attempted.
    async fn run_rollback(&self, action: &RecoveryAction) -> bool {
        let Some(rollback) = action.rollback() else {
            return false;
        };
        let budget = self.config.action_timeout;
        match timeout(budget, AssertUnwindSafe(rollback).catch_unwind()).await {
            Ok(Ok(Ok(()))) => debug!(action = %action.name(), "recovery_rollback_completed"),
            Ok(Ok(Err(err))) => {
                warn!(action = %action.name(), error = %err, "recovery_rollback_failed");
            }
            Ok(Err(_)) => warn!(action = %action.name(), "recovery_rollback_panicked"),
            Err(_) => warn!(action = %action.name(), "recovery_rollback_timed_out"),
        }
        true
    }
}

impl<C: Clock> std::fmt::Debug for RecoveryOrchestrator<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.registry.read();
        f.debug_struct("RecoveryOrchestrator")
            .field("config", &self.config)
            .field("checks", &registry.checks.len())
            .field("actions", &registry.actions.len())
            .finish_non_exhaustive()
    }
}

/// [`AlertAction`] that runs [`RecoveryOrchestrator::execute_recovery`].
pub struct RecoveryAlertAction<C: Clock = SystemClock> {
    orchestrator: Arc<RecoveryOrchestrator<C>>,
}

#[async_trait]
impl<C: Clock> AlertAction for RecoveryAlertAction<C> {
    async fn on_alert(&self, metric: &ErrorMetric) -> AppResult<()> {
        let reason = format!("alert: {} {} errors", metric.count, metric.error_type);
        match self.orchestrator.try_execute_recovery(reason).await {
            Some(true) => Ok(()),
            Some(false) => {
                Err(AppError::user_operation("execute_recovery", "recovery", "recovery run failed"))
            }
            None => {
                warn!(error_type = %metric.error_type, "recovery_already_running");
                Ok(())
            }
        }
    }
}

/// Depth-first search for a path from `candidate`'s dependencies back to
/// `candidate`; returns the cycle when one exists.
fn find_cycle(registered: &[RecoveryAction], candidate: &RecoveryAction) -> Option<Vec<String>> {
    fn visit<'a>(
        registered: &'a [RecoveryAction],
        target: &str,
        node: &'a str,
        path: &mut Vec<&'a str>,
        seen: &mut Vec<&'a str>,
    ) -> bool {
        if node == target {
            path.push(node);
            return true;
        }
        if seen.contains(&node) {
            return false;
        }
        seen.push(node);
        let Some(action) = registered.iter().find(|a| a.name() == node) else {
            return false;
        };
        path.push(node);
        for dep in action.dependencies() {
            if visit(registered, target, dep, path, seen) {
                return true;
            }
        }
        path.pop();
        false
    }

    let target = candidate.name();
    let mut seen = Vec::new();
    for dep in candidate.dependencies() {
        let mut path = vec![target];
        if visit(registered, target, dep, &mut path, &mut seen) {
            return Some(path.into_iter().map(str::to_string).collect());
        }
    }
    None
}

/// Topological order of `actions` (indices), ties broken by registration
/// order.
fn execution_order(actions: &[RecoveryAction]) -> AppResult<Vec<usize>> {
    for action in actions {
        if let Some(missing) = action
            .dependencies()
            .iter()
            .find(|dep| !actions.iter().any(|a| a.name() == dep.as_str()))
        {
            return Err(AppError::configuration(
                "recovery.actions",
                format!("action '{}' depends on unknown action '{missing}'", action.name()),
            ));
        }
    }

    let mut placed = vec![false; actions.len()];
    let mut order = Vec::with_capacity(actions.len());
    while order.len() < actions.len() {
        let ready = actions.iter().enumerate().position(|(idx, action)| {
            !placed[idx]
                && action.dependencies().iter().all(|dep| {
                    actions.iter().zip(&placed).any(|(a, done)| *done && a.name() == dep)
                })
        });
        let Some(idx) = ready else {
            return Err(AppError::configuration(
                "recovery.actions",
                "recovery actions contain a dependency cycle",
            ));
        };
        placed[idx] = true;
        order.push(idx);
    }
    Ok(order)
}

/// Actions associated with a failed check, in registration order: the action
/// depends on something named like the check, or the names overlap.
fn recommend(actions: &[RecoveryAction], failed_checks: &[String]) -> Vec<String> {
    actions
        .iter()
        .filter(|action| {
            failed_checks.iter().any(|check| {
                action.dependencies().iter().any(|dep| dep == check)
                    || names_related(check, action.name())
            })
        })
        .map(|action| action.name().to_string())
        .collect()
}

fn names_related(check: &str, action: &str) -> bool {
    let check = check.to_lowercase();
    let action = action.to_lowercase();
    !check.is_empty() && !action.is_empty() && (action.contains(&check) || check.contains(&action))
}
