//! Point-in-time summary of monitor and recovery state for external
//! reporting.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use vigil_common::duration_millis;
use vigil_common::{AppError, AppResult, Clock, ErrorKind, ErrorSeverity};

use crate::monitor::metric::window_start;
use crate::monitor::{ErrorMonitor, Trend};
use crate::recovery::{RecoveryAttempt, RecoveryOrchestrator};

/// Number of kinds listed in [`ErrorReport::top_kinds`].
const TOP_KINDS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KindSummary {
    pub kind: ErrorKind,
    /// Lifetime count
    pub count: u64,
    /// Occurrences inside the report window
    pub recent: usize,
    pub rate_per_minute: f64,
    pub severity: BTreeMap<ErrorSeverity, u64>,
    pub last_occurred: DateTime<Utc>,
    pub last_message: String,
    pub trend: Trend,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoverySummary {
    pub attempts: usize,
    pub successes: usize,
    pub failures: usize,
    /// Successes over attempts, 0.0 when nothing ran
    pub success_rate: f64,
    pub last_attempt: Option<RecoveryAttempt>,
}

impl RecoverySummary {
    pub fn from_orchestrator<C: Clock>(orchestrator: &RecoveryOrchestrator<C>) -> Self {
        let (attempts, successes) = orchestrator.history_counts();
        let success_rate =
            if attempts == 0 { 0.0 } else { successes as f64 / attempts as f64 };
        Self {
            attempts,
            successes,
            failures: attempts - successes,
            success_rate,
            last_attempt: orchestrator.get_recovery_history(1).into_iter().next(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    pub generated_at: DateTime<Utc>,
    #[serde(with = "duration_millis")]
    pub window: Duration,
    pub total_errors: u64,
    pub recent_errors: usize,
    /// One entry per recorded kind, most recent activity first
    pub kinds: Vec<KindSummary>,
    pub top_kinds: Vec<ErrorKind>,
    pub recovery: Option<RecoverySummary>,
}

impl ErrorReport {
    /// Summarize `monitor`, using `window` for rates and trends.
    ///
    /// Per kind, `window` is shortened to the span the monitor still holds
    /// occurrences for, as in [`ErrorMonitor::analyze_trends`].
    pub fn generate<C: Clock>(monitor: &ErrorMonitor<C>, window: Duration) -> Self {
        let now = monitor.clock().utc_now();

        let mut kinds: Vec<KindSummary> = monitor
            .get_metrics(None)
            .into_iter()
            .map(|metric| {
                let analysis = monitor.analyze_trends(metric.error_type, window);
                let recent = metric.count_since(window_start(now, analysis.window));
                let minutes = (analysis.window.as_secs_f64() / 60.0).max(f64::EPSILON);
                KindSummary {
                    kind: metric.error_type,
                    count: metric.count,
                    recent,
                    rate_per_minute: recent as f64 / minutes,
                    trend: analysis.trend,
                    severity: metric.severity_counts,
                    last_occurred: metric.last_occurred,
                    last_message: metric.last_message,
                }
            })
            .collect();
        kinds.sort_by(|a, b| b.recent.cmp(&a.recent).then(b.count.cmp(&a.count)));

        Self {
            generated_at: now,
            window,
            total_errors: kinds.iter().map(|k| k.count).sum(),
            recent_errors: kinds.iter().map(|k| k.recent).sum(),
            top_kinds: kinds.iter().filter(|k| k.recent > 0).take(TOP_KINDS).map(|k| k.kind).collect(),
            kinds,
            recovery: None,
        }
    }

    /// [`generate`](Self::generate) plus the orchestrator's recovery history.
    pub fn generate_with_recovery<C: Clock, R: Clock>(
        monitor: &ErrorMonitor<C>,
        orchestrator: &RecoveryOrchestrator<R>,
        window: Duration,
    ) -> Self {
        let mut report = Self::generate(monitor, window);
        report.recovery = Some(RecoverySummary::from_orchestrator(orchestrator));
        report
    }

    pub fn kind(&self, kind: ErrorKind) -> Option<&KindSummary> {
        self.kinds.iter().find(|k| k.kind == kind)
    }

    pub fn to_json_pretty(&self) -> AppResult<String> {
        serde_json::to_string_pretty(self).map_err(|err| {
            AppError::validation("report", "failed to serialize error report").with_cause(err)
        })
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Error report at {} (window {}s)",
            self.generated_at.to_rfc3339(),
            self.window.as_secs()
        )?;
        writeln!(f, "Total errors: {} ({} in window)", self.total_errors, self.recent_errors)?;
        for kind in &self.kinds {
            writeln!(
                f,
                "  {}: {} total, {} in window, {:.2}/min, {}, last: {}",
                kind.kind, kind.count, kind.recent, kind.rate_per_minute, kind.trend, kind.last_message
            )?;
        }
        if let Some(recovery) = &self.recovery {
            write!(
                f,
                "Recovery: {} attempts, {} succeeded ({:.1}%)",
                recovery.attempts,
                recovery.successes,
                recovery.success_rate * 100.0
            )?;
            if let Some(last) = &recovery.last_attempt {
                let outcome = if last.success { "succeeded" } else { "failed" };
                write!(f, ", last: {} ({outcome})", last.reason)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use vigil_common::MockClock;

    use super::*;
    use crate::monitor::MonitorConfig;
    use crate::recovery::{RecoveryAction, RecoveryConfig};

    async fn populated(clock: &MockClock) -> ErrorMonitor<MockClock> {
        let monitor =
            ErrorMonitor::with_clock(MonitorConfig::default(), clock.clone()).expect("valid config");
        monitor
            .record_error(&AppError::validation("email", "bad").with_timestamp(clock.utc_now()))
            .await;
        clock.advance(Duration::from_secs(120));
        for _ in 0..3 {
            monitor
                .record_error(&AppError::connection("refused").with_timestamp(clock.utc_now()))
                .await;
        }
        monitor
    }

    #[tokio::test]
    async fn test_report_summarizes_kinds() {
        let clock = MockClock::new();
        let monitor = populated(&clock).await;

        let report = ErrorReport::generate(&monitor, Duration::from_secs(60));

        assert_eq!(report.total_errors, 4);
        assert_eq!(report.recent_errors, 3);
        assert_eq!(report.top_kinds, [ErrorKind::Network]);
        assert_eq!(report.kinds[0].kind, ErrorKind::Network);

        let network = report.kind(ErrorKind::Network).expect("network summary");
        assert!((network.rate_per_minute - 3.0).abs() < 1e-9);
        assert_eq!(network.trend, Trend::Degrading);
        assert_eq!(network.severity.get(&ErrorSeverity::High), Some(&3));

        let validation = report.kind(ErrorKind::Validation).expect("validation summary");
        assert_eq!(validation.recent, 0);
        assert!(report.recovery.is_none());
    }

    /// Rates over a window longer than retention use the retained span.
    #[tokio::test]
    async fn test_rate_uses_retained_window() {
        let clock = MockClock::new();
        let monitor =
            ErrorMonitor::with_clock(MonitorConfig::default(), clock.clone()).expect("valid config");
        for _ in 0..120 {
            monitor
                .record_error(&AppError::connection("refused").with_timestamp(clock.utc_now()))
                .await;
            clock.advance(Duration::from_secs(60));
        }

        let report = ErrorReport::generate(&monitor, Duration::from_secs(2 * 60 * 60));
        let network = report.kind(ErrorKind::Network).expect("network summary");

        assert_eq!(report.window, Duration::from_secs(2 * 60 * 60));
        assert_eq!(network.recent, 60);
        assert!((network.rate_per_minute - 1.0).abs() < 1e-9);
        assert_eq!(network.trend, Trend::Stable);
    }

    #[tokio::test]
    async fn test_report_includes_recovery() {
        let clock = MockClock::new();
        let monitor = populated(&clock).await;
        let orchestrator = RecoveryOrchestrator::new(RecoveryConfig::default()).expect("valid config");
        orchestrator
            .add_recovery_action(RecoveryAction::new("flaky", || async { Ok(false) }))
            .expect("register");
        orchestrator.execute_recovery("first").await;

        let report =
            ErrorReport::generate_with_recovery(&monitor, &orchestrator, Duration::from_secs(60));
        let recovery = report.recovery.as_ref().expect("recovery summary");

        assert_eq!(recovery.attempts, 1);
        assert_eq!(recovery.failures, 1);
        assert_eq!(recovery.success_rate, 0.0);
        assert_eq!(recovery.last_attempt.as_ref().map(|a| a.reason.as_str()), Some("first"));

        let text = report.to_string();
        assert!(text.contains("Total errors: 4 (3 in window)"));
        assert!(text.contains("last: first (failed)"));
    }

    #[tokio::test]
    async fn test_report_serializes_to_json() {
        let clock = MockClock::new();
        let monitor = populated(&clock).await;

        let json = ErrorReport::generate(&monitor, Duration::from_secs(60))
            .to_json_pretty()
            .expect("serializable");
        let value: serde_json::Value = serde_json::from_str(&json).expect("valid json");

        assert_eq!(value["total_errors"], 4);
        assert_eq!(value["window"], 60_000);
        assert_eq!(value["kinds"][0]["kind"], "network");
        assert_eq!(value["kinds"][0]["trend"], "degrading");
    }
}
