//! Health checks and dependency-ordered recovery.
//!
//! A [`RecoveryOrchestrator`] owns a set of [`HealthCheck`]s and
//! [`RecoveryAction`]s. Actions declare the actions that must run before
//! them; the orchestrator rejects cycles at registration, runs actions in
//! topological order, and rolls back completed actions when one fails.

pub mod action;
pub mod health;
pub mod history;
pub mod orchestrator;

pub use self::action::RecoveryAction;
pub use self::health::{HealthCheck, HealthReport, OverallHealth};
pub use self::history::RecoveryAttempt;
pub use self::orchestrator::{HealOutcome, RecoveryAlertAction, RecoveryConfig, RecoveryOrchestrator};
