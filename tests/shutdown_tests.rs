//! Lifecycle tests against a live listener

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use access_gateway::config::Config;
use access_gateway::gateway::{AccessService, Gateway, serve};
use common::{StubBus, StubValidator, stubs};

const REQUEST_DELAY: Duration = Duration::from_millis(400);
const CLOSE_DELAY: Duration = Duration::from_millis(400);

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn http_and_bus_drain_concurrently() {
    // GIVEN: a slow backend whose close is slow too
    let bus = Arc::new(
        StubBus::replying("allow")
            .with_request_delay(REQUEST_DELAY)
            .with_close_delay(CLOSE_DELAY),
    );
    let service = AccessService::new(Arc::new(StubValidator::new()), Arc::<StubBus>::clone(&bus));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();

    let server = tokio::spawn(serve(
        listener,
        service,
        bus.clone(),
        Duration::from_secs(5),
        shutdown.clone(),
    ));

    // WHEN: shutdown starts while a request is in flight
    let client = reqwest::Client::new();
    let inflight = tokio::spawn(async move {
        client
            .post(format!("http://{addr}/access-check?v=1"))
            .bearer_auth("test-user")
            .json(&json!({"requests": ["resource1"]}))
            .send()
            .await
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    shutdown.cancel();
    server.await.unwrap().unwrap();
    let elapsed = started.elapsed();

    // THEN: the in-flight request completed and the bus was closed once
    let response = inflight.await.unwrap().unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body, json!({"results": ["allow"]}));
    assert_eq!(bus.closes(), 1);

    // Both steps overlap; run back to back they would need at least
    // (REQUEST_DELAY - 100ms) + CLOSE_DELAY.
    assert!(elapsed >= CLOSE_DELAY, "returned before the bus closed: {elapsed:?}");
    assert!(
        elapsed < Duration::from_millis(650),
        "shutdown steps did not overlap: {elapsed:?}"
    );
}

#[tokio::test]
async fn shutdown_without_traffic_closes_bus() {
    let bus = Arc::new(StubBus::replying("allow"));
    let service = AccessService::new(Arc::new(StubValidator::new()), Arc::<StubBus>::clone(&bus));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let shutdown = CancellationToken::new();

    let server = tokio::spawn(serve(
        listener,
        service,
        bus.clone(),
        Duration::from_secs(5),
        shutdown.clone(),
    ));

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(2), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(bus.closes(), 1);
}

#[tokio::test]
async fn slow_bus_close_is_bounded_by_shutdown_timeout() {
    let bus = Arc::new(StubBus::replying("allow").with_close_delay(Duration::from_secs(5)));
    let service = AccessService::new(Arc::new(StubValidator::new()), Arc::<StubBus>::clone(&bus));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let shutdown = CancellationToken::new();

    let server = tokio::spawn(serve(
        listener,
        service,
        bus.clone(),
        Duration::from_millis(200),
        shutdown.clone(),
    ));

    shutdown.cancel();
    let result = tokio::time::timeout(Duration::from_secs(2), server)
        .await
        .unwrap()
        .unwrap();

    let err = result.unwrap_err();
    assert!(err.to_string().contains("message bus did not close"));
}

fn local_config(port: u16) -> Config {
    let mut config = Config::default();
    config.server.host = "127.0.0.1".to_string();
    config.server.port = port;
    config.server.shutdown_timeout = Duration::from_secs(2);
    config
}

#[tokio::test]
async fn bind_failure_still_closes_bus() {
    // GIVEN: the configured port is already taken
    let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = taken.local_addr().unwrap().port();
    let (validator, bus) = stubs("allow");
    let gateway = Gateway::with_dependencies(local_config(port), validator, bus.clone());

    // WHEN: the gateway starts
    let result = gateway.run_until(CancellationToken::new()).await;

    // THEN: startup fails and the connected bus is released
    assert!(result.is_err());
    assert_eq!(bus.closes(), 1);
}

#[tokio::test]
async fn debug_mode_enables_payload_logging() {
    let (validator, bus) = stubs("allow");
    let gateway = Gateway::with_dependencies(local_config(0), validator.clone(), bus.clone());
    assert!(!gateway.service().logs_payloads());

    let mut config = local_config(0);
    config.server.debug = true;
    let gateway = Gateway::with_dependencies(config, validator, bus);
    assert!(gateway.service().logs_payloads());
}
