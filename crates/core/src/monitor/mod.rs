//! Error monitoring: per-kind aggregation, alert rules and trend analysis.
//!
//! The monitor is an explicitly constructed value; share it behind an `Arc`
//! with every component that records errors. Recording never fails: alert
//! actions that return an error or panic are logged and swallowed.
//!
//! ```rust
//! use std::time::Duration;
//!
//! use vigil_common::{AppError, ErrorKind};
//! use vigil_core::monitor::{AlertRule, ErrorMonitor};
//!
//! # tokio_test_block_on(async {
//! let monitor = ErrorMonitor::new(Default::default()).unwrap();
//! monitor.add_alert_rule(AlertRule::from_fn(
//!     ErrorKind::Network,
//!     3,
//!     Duration::from_secs(60),
//!     |metric| async move {
//!         println!("{} network errors", metric.count);
//!         Ok(())
//!     },
//! ));
//!
//! monitor.record_error(&AppError::connection("refused")).await;
//! assert_eq!(monitor.total_errors(), 1);
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

pub mod alert;
pub mod instrument;
pub mod metric;
pub mod trend;

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use vigil_common::duration_millis;
use vigil_common::{AppError, AppResult, Clock, ErrorKind, ErrorSeverity, SystemClock};

pub use self::alert::{AlertAction, AlertRule, FnAlertAction};
pub use self::instrument::{monitored, Monitored};
pub use self::metric::ErrorMetric;
pub use self::trend::{Trend, TrendAnalysis};
use self::metric::window_start;

/// Configuration for [`ErrorMonitor`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Occurrences older than this are pruned on every record
    #[serde(with = "duration_millis")]
    pub retention: Duration,
    /// Upper bound on retained occurrences per kind
    pub max_entries_per_kind: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self { retention: Duration::from_secs(60 * 60), max_entries_per_kind: 1000 }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> AppResult<()> {
        if self.retention.is_zero() {
            return Err(AppError::configuration(
                "monitor.retention",
                "retention must be greater than 0",
            ));
        }
        if self.max_entries_per_kind == 0 {
            return Err(AppError::configuration(
                "monitor.max_entries_per_kind",
                "max_entries_per_kind must be greater than 0",
            ));
        }
        Ok(())
    }
}

struct RuleEntry {
    rule: AlertRule,
    last_fired: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct MonitorState {
    metrics: HashMap<ErrorKind, ErrorMetric>,
    rules: Vec<RuleEntry>,
}

/// Time-windowed error aggregation with threshold alerts.
pub struct ErrorMonitor<C: Clock = SystemClock> {
    config: MonitorConfig,
    clock: C,
    state: Mutex<MonitorState>,
}

impl ErrorMonitor<SystemClock> {
    pub fn new(config: MonitorConfig) -> AppResult<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> ErrorMonitor<C> {
    /// Create a monitor reading "now" from `clock`
    pub fn with_clock(config: MonitorConfig, clock: C) -> AppResult<Self> {
        config.validate()?;
        Ok(Self { config, clock, state: Mutex::new(MonitorState::default()) })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Register an alert rule; it is evaluated on every matching record.
    pub fn add_alert_rule(&self, rule: AlertRule) {
        info!(
            rule = %rule.name(),
            error_type = %rule.error_type(),
            threshold = rule.threshold(),
            "alert_rule_added"
        );
        self.state.lock().rules.push(RuleEntry { rule, last_fired: None });
    }

    pub fn alert_rule_count(&self) -> usize {
        self.state.lock().rules.len()
    }

    /// Record an error, then run any alert rule it pushed over threshold.
    ///
    /// A rule fires when its windowed count reaches the threshold and it has
    /// not already fired within the last `time_window`. Actions run after the
    /// internal lock is released and are awaited before this returns.
    #[tracing::instrument(skip(self, err), fields(kind = %err.kind(), severity = %err.severity()))]
    pub async fn record_error(&self, err: &AppError) {
        log_recorded(err);

        let now = self.clock.utc_now();
        let fired = {
            let mut state = self.state.lock();
            let cutoff = window_start(now, self.config.retention);
            for metric in state.metrics.values_mut() {
                metric.prune(cutoff);
            }

            let metric = state.metrics.entry(err.kind()).or_insert_with(|| ErrorMetric::new(err));
            metric.record(err, self.config.max_entries_per_kind);
            // Errors with a timestamp outside retention are counted but not kept
            metric.prune(cutoff);
            let snapshot = metric.clone();

            let mut fired = Vec::new();
            for entry in state.rules.iter_mut().filter(|e| e.rule.error_type() == err.kind()) {
                let since = window_start(now, entry.rule.time_window());
                if snapshot.count_since(since) < entry.rule.threshold() {
                    continue;
                }
                let debounced = entry.last_fired.is_some_and(|last| last > since);
                if debounced {
                    continue;
                }
                entry.last_fired = Some(now);
                fired.push((entry.rule.name().to_string(), entry.rule.action()));
            }
            (fired, snapshot)
        };

        let (actions, snapshot) = fired;
        for (rule, action) in actions {
            info!(rule = %rule, count = snapshot.count, "alert_rule_fired");
            match AssertUnwindSafe(action.on_alert(&snapshot)).catch_unwind().await {
                Ok(Ok(())) => debug!(rule = %rule, "alert_action_completed"),
                Ok(Err(action_error)) => {
                    warn!(rule = %rule, error = %action_error, "alert_action_failed");
                }
                Err(_) => error!(rule = %rule, "alert_action_panicked"),
            }
        }
    }

    /// Snapshots of every metric, or only of `kind`.
    pub fn get_metrics(&self, kind: Option<ErrorKind>) -> Vec<ErrorMetric> {
        let state = self.state.lock();
        let mut metrics: Vec<ErrorMetric> = match kind {
            Some(kind) => state.metrics.get(&kind).cloned().into_iter().collect(),
            None => state.metrics.values().cloned().collect(),
        };
        metrics.sort_by_key(|m| m.error_type);
        metrics
    }

    pub fn metric(&self, kind: ErrorKind) -> Option<ErrorMetric> {
        self.state.lock().metrics.get(&kind).cloned()
    }

    /// Lifetime number of recorded errors across all kinds.
    pub fn total_errors(&self) -> u64 {
        self.state.lock().metrics.values().map(|m| m.count).sum()
    }

    /// Forget all metrics and debounce state; rules stay registered.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.metrics.clear();
        for entry in &mut state.rules {
            entry.last_fired = None;
        }
    }

    /// Compare occurrence counts in the two halves of `window` ending now.
    ///
    /// `window` is shortened to the span the monitor still holds
    /// occurrences for; the returned analysis reports the window used.
    pub fn analyze_trends(&self, kind: ErrorKind, window: Duration) -> TrendAnalysis {
        let now = self.clock.utc_now();
        let state = self.state.lock();
        let metric = state.metrics.get(&kind);
        let window = self.observable_window(metric, now, window);
        match metric {
            Some(metric) => TrendAnalysis::compute(kind, metric.occurrences(), now, window),
            None => TrendAnalysis::compute(kind, std::iter::empty(), now, window),
        }
    }

    /// Clamp `window` to retention, and to the oldest kept occurrence once
    /// the per-kind cap has evicted older ones.
    fn observable_window(
        &self,
        metric: Option<&ErrorMetric>,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Duration {
        let mut horizon = self.config.retention;
        let capped = metric.filter(|m| m.retained() >= self.config.max_entries_per_kind);
        if let Some(oldest) = capped.and_then(|m| m.occurrences().min()) {
            let kept = (now - *oldest).to_std().unwrap_or_default();
            if !kept.is_zero() {
                horizon = horizon.min(kept);
            }
        }
        window.min(horizon)
    }
}

impl<C: Clock> std::fmt::Debug for ErrorMonitor<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ErrorMonitor")
            .field("config", &self.config)
            .field("kinds", &state.metrics.len())
            .field("rules", &state.rules.len())
            .finish()
    }
}

/// Shared handle type used by clients and instrumentation.
pub type SharedMonitor<C = SystemClock> = Arc<ErrorMonitor<C>>;

fn log_recorded(err: &AppError) {
    let kind = err.kind();
    match err.severity() {
        ErrorSeverity::Low => debug!(kind = %kind, error = %err, "error_recorded"),
        ErrorSeverity::Medium => info!(kind = %kind, error = %err, "error_recorded"),
        ErrorSeverity::High => warn!(kind = %kind, error = %err, "error_recorded"),
        ErrorSeverity::Critical => error!(kind = %kind, error = %err, "error_recorded"),
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the error monitor
    //!
    //! Covers aggregation, retention pruning, alert debouncing and failure
    //! isolation of alert actions.

    use std::sync::atomic::{AtomicU32, Ordering};

    use vigil_common::MockClock;

    use super::*;

    fn monitor(clock: &MockClock) -> ErrorMonitor<MockClock> {
        ErrorMonitor::with_clock(MonitorConfig::default(), clock.clone()).expect("valid config")
    }

    fn network(clock: &MockClock) -> AppError {
        AppError::connection("refused").with_timestamp(clock.utc_now())
    }

    fn counting_rule(threshold: usize, window: Duration) -> (AlertRule, Arc<AtomicU32>) {
        let fired = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&fired);
        let rule = AlertRule::from_fn(ErrorKind::Network, threshold, window, move |_metric| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        (rule, fired)
    }

    async fn panicking_alert(_metric: ErrorMetric) -> AppResult<()> {
        panic!("alert handler bug")
    }

    #[test]
    fn test_config_validation() {
        assert!(MonitorConfig::default().validate().is_ok());
        let config = MonitorConfig { max_entries_per_kind: 0, ..MonitorConfig::default() };
        assert!(ErrorMonitor::new(config).is_err());
    }

    #[tokio::test]
    async fn test_records_per_kind() {
        let clock = MockClock::new();
        let monitor = monitor(&clock);

        monitor.record_error(&network(&clock)).await;
        clock.advance(Duration::from_secs(4));
        monitor.record_error(&network(&clock)).await;
        monitor.record_error(&AppError::validation("email", "bad").with_timestamp(clock.utc_now())).await;

        let metric = monitor.metric(ErrorKind::Network).expect("network metric");
        assert_eq!(metric.count, 2);
        assert_eq!(metric.average_interval, Duration::from_secs(4));
        assert_eq!(monitor.total_errors(), 3);
        assert_eq!(monitor.get_metrics(None).len(), 2);
        assert_eq!(monitor.get_metrics(Some(ErrorKind::Validation)).len(), 1);
        assert!(monitor.get_metrics(Some(ErrorKind::Database)).is_empty());
    }

    /// Four errors within the window fire a threshold-3 rule once.
    #[tokio::test]
    async fn test_alert_fires_once_per_window() {
        let clock = MockClock::new();
        let monitor = monitor(&clock);
        let (rule, fired) = counting_rule(3, Duration::from_secs(60));
        monitor.add_alert_rule(rule);

        for _ in 0..4 {
            monitor.record_error(&network(&clock)).await;
            clock.advance(Duration::from_secs(1));
        }

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    /// After a full window has passed the rule may fire again.
    #[tokio::test]
    async fn test_alert_rearms_after_window() {
        let clock = MockClock::new();
        let monitor = monitor(&clock);
        let (rule, fired) = counting_rule(2, Duration::from_secs(10));
        monitor.add_alert_rule(rule);

        monitor.record_error(&network(&clock)).await;
        monitor.record_error(&network(&clock)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(11));
        monitor.record_error(&network(&clock)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1, "only one error in the new window");

        monitor.record_error(&network(&clock)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rules_only_match_their_kind() {
        let clock = MockClock::new();
        let monitor = monitor(&clock);
        let (rule, fired) = counting_rule(1, Duration::from_secs(60));
        monitor.add_alert_rule(rule);

        monitor.record_error(&AppError::api(500, "/x", "boom").with_timestamp(clock.utc_now())).await;

        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    /// A failing or panicking action does not affect recording.
    #[tokio::test]
    async fn test_failing_alert_actions_are_isolated() {
        let clock = MockClock::new();
        let monitor = monitor(&clock);
        monitor.add_alert_rule(AlertRule::from_fn(
            ErrorKind::Network,
            1,
            Duration::from_secs(60),
            |_metric| async { Err(AppError::external_service("pager", "unreachable")) },
        ));
        monitor.add_alert_rule(AlertRule::from_fn(
            ErrorKind::Network,
            1,
            Duration::from_secs(60),
            panicking_alert,
        ));
        let (rule, fired) = counting_rule(1, Duration::from_secs(60));
        monitor.add_alert_rule(rule);

        monitor.record_error(&network(&clock)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(monitor.total_errors(), 1);
    }

    #[tokio::test]
    async fn test_retention_prunes_lazily() {
        let clock = MockClock::new();
        let config = MonitorConfig { retention: Duration::from_secs(30), ..MonitorConfig::default() };
        let monitor = ErrorMonitor::with_clock(config, clock.clone()).expect("valid config");

        monitor.record_error(&network(&clock)).await;
        clock.advance(Duration::from_secs(31));
        monitor.record_error(&AppError::validation("x", "bad").with_timestamp(clock.utc_now())).await;

        let metric = monitor.metric(ErrorKind::Network).expect("network metric");
        assert_eq!(metric.retained(), 0);
        assert_eq!(metric.count, 1);
    }

    #[tokio::test]
    async fn test_recorded_context_is_isolated() {
        let clock = MockClock::new();
        let monitor = monitor(&clock);
        let err = network(&clock).with_context("request_id", "r-1");

        monitor.record_error(&err).await;
        let mut copy = err.context();
        copy.insert("request_id".into(), "mutated".into());

        assert_eq!(err.context_value("request_id"), Some("r-1"));
    }

    #[tokio::test]
    async fn test_analyze_trends_degrading() {
        let clock = MockClock::new();
        let monitor = monitor(&clock);

        monitor.record_error(&network(&clock)).await;
        clock.advance(Duration::from_secs(40));
        for _ in 0..3 {
            monitor.record_error(&network(&clock)).await;
        }
        clock.advance(Duration::from_secs(10));

        let analysis = monitor.analyze_trends(ErrorKind::Network, Duration::from_secs(60));
        assert_eq!(analysis.first_half, 1);
        assert_eq!(analysis.second_half, 3);
        assert_eq!(analysis.trend, Trend::Degrading);

        let unknown = monitor.analyze_trends(ErrorKind::Database, Duration::from_secs(60));
        assert_eq!(unknown.trend, Trend::Stable);
    }

    /// A steady rate stays stable when the requested window exceeds retention.
    ///
    /// # Test Steps
    /// 1. Record one network error per minute for two hours (retention 1h)
    /// 2. Analyze over a two-hour window
    ///
    /// Assertions:
    /// - The window is shortened to one hour
    /// - Both halves hold the same count and the trend is stable
    #[tokio::test]
    async fn test_trend_window_clamped_to_retention() {
        let clock = MockClock::new();
        let monitor = monitor(&clock);
        for _ in 0..120 {
            monitor.record_error(&network(&clock)).await;
            clock.advance(Duration::from_secs(60));
        }

        let analysis = monitor.analyze_trends(ErrorKind::Network, Duration::from_secs(2 * 60 * 60));

        assert_eq!(analysis.window, Duration::from_secs(60 * 60));
        assert_eq!(analysis.first_half, 30);
        assert_eq!(analysis.second_half, 30);
        assert_eq!(analysis.trend, Trend::Stable);
    }

    /// Once the per-kind cap evicts occurrences, trends only span what is kept.
    #[tokio::test]
    async fn test_trend_window_clamped_to_kept_occurrences() {
        let clock = MockClock::new();
        let config = MonitorConfig { max_entries_per_kind: 10, ..MonitorConfig::default() };
        let monitor = ErrorMonitor::with_clock(config, clock.clone()).expect("valid config");
        for _ in 0..30 {
            monitor.record_error(&network(&clock)).await;
            clock.advance(Duration::from_secs(60));
        }

        let analysis = monitor.analyze_trends(ErrorKind::Network, Duration::from_secs(60 * 60));

        assert_eq!(analysis.window, Duration::from_secs(10 * 60));
        assert_eq!((analysis.first_half, analysis.second_half), (5, 5));
        assert_eq!(analysis.trend, Trend::Stable);
    }

    #[tokio::test]
    async fn test_clear_resets_metrics_and_debounce() {
        let clock = MockClock::new();
        let monitor = monitor(&clock);
        let (rule, fired) = counting_rule(1, Duration::from_secs(60));
        monitor.add_alert_rule(rule);

        monitor.record_error(&network(&clock)).await;
        monitor.clear();
        assert_eq!(monitor.total_errors(), 0);

        monitor.record_error(&network(&clock)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 2);
        assert_eq!(monitor.alert_rule_count(), 1);
    }
}
