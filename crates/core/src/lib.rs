//! # Vigil Core
//!
//! Error monitoring and recovery built on the `vigil-common` taxonomy.
//!
//! This crate contains:
//! - [`monitor`]: per-kind error aggregation, alert rules, trend analysis and
//!   the higher-order `monitored` wrapper
//! - [`recovery`]: health checks and dependency-ordered recovery actions with
//!   rollback
//! - [`report`]: summaries of both for external reporting
//!
//! ## Architecture Principles
//! - Only depends on `vigil-common`
//! - No HTTP or platform code; outbound calls live in `vigil-infra`
//! - Every component is an explicitly constructed value, generic over
//!   [`Clock`](vigil_common::Clock) so tests can drive time

pub mod monitor;
pub mod recovery;
pub mod report;

pub use monitor::{
    monitored, AlertAction, AlertRule, ErrorMetric, ErrorMonitor, MonitorConfig, Monitored,
    SharedMonitor, Trend, TrendAnalysis,
};
pub use recovery::{
    HealOutcome, HealthCheck, HealthReport, OverallHealth, RecoveryAction, RecoveryAttempt,
    RecoveryConfig, RecoveryOrchestrator,
};
pub use report::{ErrorReport, KindSummary, RecoverySummary};
