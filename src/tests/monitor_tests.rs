// src/tests/monitor_tests.rs

use std::sync::Arc;
use std::time::Duration;
use tokio::time;

use super::common::{mocked_client, test_config};
use crate::client::ResilientStoreClient;
use crate::metrics::{AlertSeverity, AlertThresholds};
use crate::monitor::MetricsScraper;
use crate::resilience::CircuitState;
use crate::test_utils::MockFailure;

#[tokio::test]
async fn test_scraper_collects_health_and_metrics() {
    let (_, client) = mocked_client();
    let client = Arc::new(client);
    client.set("k", b"v", None).await.unwrap();

    let handle = MetricsScraper::spawn(
        Arc::clone(&client),
        Duration::from_millis(20),
        AlertThresholds::default(),
    );
    time::sleep(Duration::from_millis(100)).await;

    assert!(handle.scrape_count() >= 1);
    let scrape = handle.latest().unwrap();
    assert!(scrape.health.redis_available);
    assert_eq!(scrape.metrics.metrics.redis_hits, 1);
    assert!(scrape.alerts.is_empty());

    handle.stop().await;
}

#[tokio::test]
async fn test_scraper_raises_fallback_alert() {
    let client = Arc::new(ResilientStoreClient::fallback_only(test_config()));
    for i in 0..5 {
        client.set(&format!("k{}", i), b"v", None).await.unwrap();
    }

    let handle = MetricsScraper::spawn(
        Arc::clone(&client),
        Duration::from_millis(20),
        AlertThresholds::default(),
    );
    time::sleep(Duration::from_millis(60)).await;

    let scrape = handle.latest().unwrap();
    assert!(scrape.health.fallback_active);
    assert!(scrape
        .alerts
        .iter()
        .any(|a| a.metric == "fallback_dependency_percent"));

    handle.stop().await;
}

#[tokio::test]
async fn test_open_circuit_is_critical() {
    let (remote, client) = mocked_client();
    remote.set_failure(Some(MockFailure::Unreachable));
    for _ in 0..3 {
        client.get("k").await.unwrap();
    }
    assert_eq!(client.circuit_breaker().state(), CircuitState::Open);

    let alerts = AlertThresholds::default().evaluate(&client.get_comprehensive_metrics());

    assert!(alerts
        .iter()
        .any(|a| a.metric == "circuit_breaker_state" && a.severity == AlertSeverity::Critical));
    assert!(alerts.iter().any(|a| a.metric == "failure_rate_percent"));
}

#[tokio::test]
async fn test_stopped_scraper_stops_counting() {
    let client = Arc::new(ResilientStoreClient::fallback_only(test_config()));
    let handle = MetricsScraper::spawn(
        Arc::clone(&client),
        Duration::from_millis(10),
        AlertThresholds::default(),
    );
    time::sleep(Duration::from_millis(50)).await;
    handle.stop().await;

    // The task has exited, so the client is only held here
    assert_eq!(Arc::strong_count(&client), 1);
}
