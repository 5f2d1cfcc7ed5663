//! Integration tests for ResilientClient over a real reqwest transport
//!
//! **Coverage:**
//! - Happy path: JSON decoding with bearer authentication
//! - Server errors: answered immediately, never retried
//! - Network failures: timeouts and refused connections are retried
//! - Circuit breaker: opens on repeated 5xx and fails fast afterwards
//! - Monitoring: raised errors reach the ErrorMonitor and its alert rules
//! - Recovery: the client's health probe feeds the orchestrator
//!
//! **Infrastructure:**
//! - WireMock HTTP server

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use vigil_common::{CircuitBreakerConfig, CircuitState, ErrorKind, NetworkFailure};
use vigil_core::{
    AlertRule, ErrorMonitor, MonitorConfig, OverallHealth, RecoveryConfig, RecoveryOrchestrator,
};
use vigil_infra::client::{ClientConfig, ResilientClient, StaticToken};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer) -> ClientConfig {
    ClientConfig::builder()
        .base_url(server.uri())
        .timeout(Duration::from_secs(2))
        .retry_attempts(2)
        .retry_delay(Duration::from_millis(10))
        .without_circuit_breaker()
        .build()
        .expect("valid config")
}

#[tokio::test]
async fn test_get_decodes_json_with_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/users/7"))
        .and(header("authorization", "Bearer s3cret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": 7,
            "name": "ada"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = ResilientClient::new(config_for(&server))
        .expect("client")
        .with_auth(Arc::new(StaticToken::new("s3cret")));

    let user: serde_json::Value = client.get("/v1/users/7").await.expect("user");

    assert_eq!(user["name"], "ada");
}

#[tokio::test]
async fn test_server_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .expect(1)
        .mount(&server)
        .await;

    let client = ResilientClient::new(config_for(&server)).expect("client");

    let err = client.get::<serde_json::Value>("/status").await.expect_err("503");

    assert_eq!(err.kind(), ErrorKind::Api);
    assert_eq!(err.status_code(), Some(503));
    assert!(err.message().contains("maintenance"));
}

/// Validates a slow first response is retried after the attempt times out.
///
/// # Test Steps
/// 1. First request is delayed beyond the client timeout
/// 2. Second request answers immediately
///
/// Assertions:
/// - The call succeeds with the second response
/// - The server saw exactly two requests
#[tokio::test]
async fn test_timeout_is_retried() {
    let server = MockServer::start().await;
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    Mock::given(method("GET"))
        .respond_with(move |_req: &wiremock::Request| -> ResponseTemplate {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                ResponseTemplate::new(200).set_body_string("1").set_delay(Duration::from_secs(2))
            } else {
                ResponseTemplate::new(200).set_body_string("2")
            }
        })
        .mount(&server)
        .await;

    let config = ClientConfig { timeout: Duration::from_millis(200), ..config_for(&server) };
    let client = ResilientClient::new(config).expect("client");

    let value: u32 = client.get("/slow").await.expect("second attempt");

    assert_eq!(value, 2);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_refused_connection_exhausts_retries() {
    let config = ClientConfig::builder()
        .base_url("http://127.0.0.1:1")
        .retry_attempts(2)
        .retry_delay(Duration::from_millis(10))
        .without_circuit_breaker()
        .build()
        .expect("valid config");
    let client = ResilientClient::new(config).expect("client");

    let err = client.get::<serde_json::Value>("/x").await.expect_err("nothing listening");

    assert_eq!(err.kind(), ErrorKind::Network);
    assert_eq!(err.network_failure(), Some(NetworkFailure::RetriesExhausted));
    assert!(err.message().starts_with("all 3 attempts failed"), "{err}");
}

#[tokio::test]
async fn test_breaker_opens_on_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let config = ClientConfig {
        circuit_breaker: Some(CircuitBreakerConfig {
            failure_threshold: 2,
            timeout_threshold: Duration::from_secs(60),
            ..CircuitBreakerConfig::default()
        }),
        ..config_for(&server)
    };
    let client = ResilientClient::new(config).expect("client");

    for _ in 0..2 {
        let err = client.get::<()>("/flaky").await.expect_err("500");
        assert_eq!(err.status_code(), Some(500));
    }

    let err = client.get::<()>("/flaky").await.expect_err("open");
    assert_eq!(err.kind(), ErrorKind::CircuitOpen);
    let status = client.breaker_status().expect("breaker configured");
    assert_eq!(status.state, CircuitState::Open);
    assert_eq!(status.rejected_calls, 1);
}

#[tokio::test]
async fn test_errors_feed_monitor_alerts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let monitor = Arc::new(ErrorMonitor::new(MonitorConfig::default()).expect("monitor"));
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    monitor.add_alert_rule(AlertRule::from_fn(
        ErrorKind::Api,
        2,
        Duration::from_secs(60),
        move |_metric| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        },
    ));

    let client =
        ResilientClient::new(config_for(&server)).expect("client").with_monitor(Arc::clone(&monitor));
    for _ in 0..3 {
        let _ = client.get::<()>("/missing").await;
    }

    assert_eq!(monitor.metric(ErrorKind::Api).map(|m| m.count), Some(3));
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_health_probe_drives_orchestrator() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let client = Arc::new(ResilientClient::new(config_for(&server)).expect("client"));
    let orchestrator = RecoveryOrchestrator::new(RecoveryConfig::default()).expect("orchestrator");
    orchestrator.add_health_check(client.health_check("api", "/health")).expect("register");
    orchestrator
        .add_health_check(client.health_check("search", "/search/health"))
        .expect("register");

    let report = orchestrator.perform_health_check().await;

    assert_eq!(report.overall_health, OverallHealth::Degraded);
    assert_eq!(report.passed_checks, vec!["api".to_string()]);
    assert_eq!(report.failed_checks, vec!["search".to_string()]);
}
