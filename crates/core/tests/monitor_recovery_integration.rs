//! Integration tests for monitor-driven recovery
//!
//! Exercises the alert → recovery path and the orchestrator's registration
//! and rollback guarantees through the public API only.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use vigil_common::{AppError, Clock, ErrorKind, MockClock};
use vigil_core::{
    monitored, AlertRule, ErrorMonitor, ErrorReport, MonitorConfig, RecoveryAction,
    RecoveryConfig, RecoveryOrchestrator,
};

fn orchestrator() -> Arc<RecoveryOrchestrator> {
    Arc::new(RecoveryOrchestrator::new(RecoveryConfig::default()).expect("valid config"))
}

/// Validates that an alert rule can trigger a recovery run.
///
/// # Test Steps
/// 1. Register a recovery action counting its executions
/// 2. Wire the orchestrator's alert action into a threshold-3 network rule
/// 3. Record four network errors within the window
///
/// Assertions:
/// - Recovery ran exactly once
/// - The history names the alert as reason
#[tokio::test]
async fn test_alert_triggers_recovery_once() {
    let clock = MockClock::new();
    let monitor =
        ErrorMonitor::with_clock(MonitorConfig::default(), clock.clone()).expect("valid config");
    let orchestrator = orchestrator();

    let runs = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&runs);
    orchestrator
        .add_recovery_action(RecoveryAction::new("reconnect", move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            }
        }))
        .expect("register reconnect");

    monitor.add_alert_rule(
        AlertRule::new(ErrorKind::Network, 3, Duration::from_secs(60), orchestrator.alert_action())
            .named("network_storm"),
    );

    for _ in 0..4 {
        let result = monitored(&monitor, async {
            Err::<(), _>(AppError::connection("refused").with_timestamp(clock.utc_now()))
        })
        .await;
        assert!(result.is_err());
        clock.advance(Duration::from_secs(1));
    }

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    let history = orchestrator.get_recovery_history(10);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].reason, "alert: 3 NetworkError errors");
}

/// Validates that an alert raised from inside a recovery run does not wait
/// on that run.
///
/// # Test Steps
/// 1. Register a recovery action that records an API error into the monitor
/// 2. Wire the orchestrator's alert action into threshold-1 network and API
///    rules
/// 3. Record one network error
///
/// Assertions:
/// - Recording completes instead of hanging
/// - The nested API alert is skipped, so exactly one attempt is recorded
#[tokio::test]
async fn test_alert_during_recovery_is_skipped() {
    let monitor = Arc::new(ErrorMonitor::new(MonitorConfig::default()).expect("valid config"));
    let orchestrator = orchestrator();

    let inner = Arc::clone(&monitor);
    orchestrator
        .add_recovery_action(RecoveryAction::new("resync", move || {
            let monitor = Arc::clone(&inner);
            async move {
                monitor.record_error(&AppError::api(502, "/sync", "bad gateway")).await;
                Ok(true)
            }
        }))
        .expect("register resync");

    for kind in [ErrorKind::Network, ErrorKind::Api] {
        monitor.add_alert_rule(AlertRule::new(
            kind,
            1,
            Duration::from_secs(60),
            orchestrator.alert_action(),
        ));
    }

    tokio::time::timeout(
        Duration::from_secs(2),
        monitor.record_error(&AppError::connection("refused")),
    )
    .await
    .expect("recording must not wait on its own recovery run");

    assert_eq!(monitor.metric(ErrorKind::Api).map(|m| m.count), Some(1));
    let history = orchestrator.get_recovery_history(10);
    assert_eq!(history.len(), 1);
    assert!(history[0].success);
    assert_eq!(history[0].reason, "alert: 1 NetworkError errors");
}

/// Validates that a cyclic registration leaves the registry unchanged.
///
/// Verifies:
/// - A depends on B registers
/// - B depends on A is rejected with a configuration error
/// - B is not registered
#[test]
fn test_cyclic_registration_is_rejected() {
    let orchestrator = orchestrator();
    orchestrator
        .add_recovery_action(RecoveryAction::new("A", || async { Ok(true) }).depends_on("B"))
        .expect("A registers");

    let err = orchestrator
        .add_recovery_action(RecoveryAction::new("B", || async { Ok(true) }).depends_on("A"))
        .expect_err("B closes a cycle");

    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(orchestrator.action_names(), ["A"]);
}

/// Validates rollback of completed actions when a dependent action fails.
///
/// # Test Steps
/// 1. Register A (succeeds, has rollback) and B (depends on A, fails)
/// 2. Execute recovery
///
/// Assertions:
/// - Recovery returns false
/// - A was rolled back exactly once, B has no rollback
/// - History records the failed attempt
#[tokio::test]
async fn test_failed_dependent_rolls_back_prerequisite() {
    let orchestrator = orchestrator();
    let rollbacks: Arc<Mutex<Vec<&'static str>>> = Arc::default();
    let log = Arc::clone(&rollbacks);

    orchestrator
        .add_recovery_action(RecoveryAction::new("A", || async { Ok(true) }).with_rollback(
            move || {
                let log = Arc::clone(&log);
                async move {
                    log.lock().push("A");
                    Ok(())
                }
            },
        ))
        .expect("A registers");
    orchestrator
        .add_recovery_action(RecoveryAction::new("B", || async { Ok(false) }).depends_on("A"))
        .expect("B registers");

    assert!(!orchestrator.execute_recovery("database outage").await);

    assert_eq!(*rollbacks.lock(), ["A"]);
    let attempt = &orchestrator.get_recovery_history(1)[0];
    assert!(!attempt.success);
    assert_eq!(attempt.actions, ["A", "B"]);
    assert_eq!(attempt.failed_action.as_deref(), Some("B"));
    assert_eq!(attempt.rolled_back, ["A"]);
}

/// Validates that concurrent recovery runs are serialized.
#[tokio::test]
async fn test_concurrent_recoveries_do_not_interleave() {
    let orchestrator = orchestrator();
    let active = Arc::new(AtomicU32::new(0));
    let overlapped = Arc::new(AtomicU32::new(0));
    let (active_in, overlapped_in) = (Arc::clone(&active), Arc::clone(&overlapped));

    orchestrator
        .add_recovery_action(RecoveryAction::new("exclusive", move || {
            let active = Arc::clone(&active_in);
            let overlapped = Arc::clone(&overlapped_in);
            async move {
                if active.fetch_add(1, Ordering::SeqCst) > 0 {
                    overlapped.fetch_add(1, Ordering::SeqCst);
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(true)
            }
        }))
        .expect("register");

    let (first, second) = tokio::join!(
        orchestrator.execute_recovery("first"),
        orchestrator.execute_recovery("second")
    );

    assert!(first && second);
    assert_eq!(overlapped.load(Ordering::SeqCst), 0);
    assert_eq!(orchestrator.get_recovery_history(10).len(), 2);
}

/// Validates the report over a monitor and orchestrator pair.
#[tokio::test]
async fn test_report_over_live_components() {
    let clock = MockClock::new();
    let monitor =
        ErrorMonitor::with_clock(MonitorConfig::default(), clock.clone()).expect("valid config");
    let orchestrator = orchestrator();
    orchestrator
        .add_recovery_action(RecoveryAction::new("noop", || async { Ok(true) }))
        .expect("register");

    let outage = AppError::api(503, "/orders", "unavailable").with_timestamp(clock.utc_now());
    monitor.record_error(&outage).await;
    orchestrator.execute_recovery("manual").await;

    let report =
        ErrorReport::generate_with_recovery(&monitor, &orchestrator, Duration::from_secs(300));

    assert_eq!(report.total_errors, 1);
    assert_eq!(report.top_kinds, [ErrorKind::Api]);
    let recovery = report.recovery.expect("recovery summary");
    assert_eq!(recovery.successes, 1);
    assert!((recovery.success_rate - 1.0).abs() < f64::EPSILON);
}
