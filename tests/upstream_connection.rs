//! Upstream connection manager against a live HTTP upstream.

mod common;

use std::sync::{Arc, Mutex};

use bitbucket_mcp_server::config::{CircuitBreakerConfig, ConnectionConfig};
use bitbucket_mcp_server::resilience::{CircuitBreaker, CircuitState};
use bitbucket_mcp_server::upstream::{
    HttpUpstreamClient, ServerType, UpstreamConnectionManager, UpstreamError, PROBE_PATHS,
};
use common::{properties_body, start_mock_upstream, test_config};

fn manager(url: &str, breaker: Option<CircuitBreaker>) -> Arc<UpstreamConnectionManager> {
    let config = test_config(url);
    let client = HttpUpstreamClient::new(&config.upstream).unwrap();
    Arc::new(UpstreamConnectionManager::new(
        Arc::new(client),
        ConnectionConfig {
            retry_attempts: 2,
            retry_base_delay_ms: 5,
            reconnect_delay_secs: 60,
        },
        breaker,
    ))
}

fn record_events(manager: &UpstreamConnectionManager) -> Arc<Mutex<Vec<&'static str>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    manager.on_event(move |event| sink.lock().unwrap().push(event.kind()));
    events
}

#[tokio::test]
async fn test_connect_detects_cloud_host() {
    let upstream = start_mock_upstream(|_, _| (200, r#"{"version":"cloud"}"#.to_string())).await;
    let manager = manager(&upstream.url(), None);

    let info = manager.connect().await.unwrap();
    assert_eq!(info.version, "cloud");
    // A loopback host is never bitbucket.org.
    assert_eq!(info.server_type, ServerType::Server);
    assert!(manager.is_connected());
    assert_eq!(upstream.paths(), vec![PROBE_PATHS[0].to_string()]);
}

#[tokio::test]
async fn test_connect_reads_deployment_type() {
    let upstream = start_mock_upstream(|_, _| {
        (
            200,
            r#"{"version":"8.19.1","deploymentType":"Data Center"}"#.to_string(),
        )
    })
    .await;
    let manager = manager(&upstream.url(), None);

    let info = manager.connect().await.unwrap();
    assert_eq!(info.server_type, ServerType::DataCenter);
}

#[tokio::test]
async fn test_rejected_credentials_are_not_retried() {
    let upstream = start_mock_upstream(|_, _| (401, r#"{"errors":[]}"#.to_string())).await;
    let manager = manager(&upstream.url(), None);
    let events = record_events(&manager);

    let err = manager.connect().await.unwrap_err();
    assert!(matches!(err, UpstreamError::Authentication { status: 401, .. }));
    assert_eq!(upstream.paths().len(), 1);
    assert_eq!(*events.lock().unwrap(), vec!["disconnected", "error"]);
    assert!(!manager.has_pending_reconnect());
}

#[tokio::test]
async fn test_unreachable_upstream_is_connection_error() {
    // Bind then drop to get a port nothing listens on.
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let manager = manager(&format!("http://127.0.0.1:{port}"), None);

    let err = manager.connect().await.unwrap_err();
    assert_eq!(err.kind(), "connection");
    assert!(!manager.is_connected());
}

#[tokio::test]
async fn test_failed_call_disconnects_and_schedules_reconnect() {
    let upstream = start_mock_upstream(|_, index| {
        if index == 0 {
            (200, properties_body())
        } else {
            (500, "boom".to_string())
        }
    })
    .await;
    let manager = manager(&upstream.url(), None);
    manager.connect().await.unwrap();
    let events = record_events(&manager);

    let err = manager
        .get_json("/rest/api/1.0/projects")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "connection");
    assert!(!manager.is_connected());
    assert!(manager.has_pending_reconnect());
    assert_eq!(*events.lock().unwrap(), vec!["disconnected", "error"]);

    manager.dispose();
    assert!(!manager.has_pending_reconnect());
}

#[tokio::test]
async fn test_open_breaker_short_circuits_calls() {
    let upstream = start_mock_upstream(|_, index| {
        if index == 0 {
            (200, properties_body())
        } else {
            (503, String::new())
        }
    })
    .await;
    let breaker = CircuitBreaker::new(
        "bitbucket",
        CircuitBreakerConfig {
            reset_timeout_ms: 60_000,
            ..CircuitBreakerConfig::default()
        },
    );
    let manager = manager(&upstream.url(), Some(breaker));
    manager.connect().await.unwrap();

    let first = manager.get_json("/rest/api/1.0/repos").await.unwrap_err();
    assert_eq!(first.kind(), "connection");
    assert_eq!(manager.breaker().unwrap().state(), CircuitState::Open);

    let second = manager.get_json("/rest/api/1.0/repos").await.unwrap_err();
    assert!(matches!(second, UpstreamError::CircuitOpen { .. }));
    // Connect probe plus the one call that reached the upstream.
    assert_eq!(upstream.paths().len(), 2);

    manager.dispose();
}

#[tokio::test]
async fn test_service_errors_do_not_trip_breaker() {
    let upstream = start_mock_upstream(|_, index| {
        if index == 0 {
            (200, properties_body())
        } else {
            (404, r#"{"errors":[{"message":"No such repository"}]}"#.to_string())
        }
    })
    .await;
    let breaker = CircuitBreaker::new("bitbucket", CircuitBreakerConfig::default());
    let manager = manager(&upstream.url(), Some(breaker));
    manager.connect().await.unwrap();

    for _ in 0..3 {
        let err = manager.get_json("/rest/api/1.0/repos/x").await.unwrap_err();
        assert_eq!(err.kind(), "service");
    }
    assert_eq!(manager.breaker().unwrap().state(), CircuitState::Closed);
    assert!(manager.is_connected());
    assert!(!manager.has_pending_reconnect());
}
