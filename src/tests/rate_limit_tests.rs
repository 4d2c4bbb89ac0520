// src/tests/rate_limit_tests.rs

use std::sync::Arc;
use std::time::Duration;

use super::common::{mocked_client, test_config};
use crate::client::ResilientStoreClient;
use crate::rate_limit::RateWindow;
use crate::test_utils::MockFailure;

// 2023-11-15T12:00:30Z, mid-window for every window size
const NOW: u64 = 1_700_049_630;

#[tokio::test]
async fn test_rate_limit_allows_up_to_limit() {
    let (_, client) = mocked_client();

    for expected in 1..=3 {
        let status = client
            .check_rate_limit_at("user1", 3, RateWindow::Minute, NOW)
            .await
            .unwrap();
        assert!(status.allowed, "Request {} should be allowed", expected);
        assert_eq!(status.current_count, expected);
        assert_eq!(status.remaining, 3 - expected);
        assert_eq!(status.limit, 3);
    }

    let denied = client
        .check_rate_limit_at("user1", 3, RateWindow::Minute, NOW)
        .await
        .unwrap();
    assert!(!denied.allowed, "4th request should be denied");
    assert_eq!(denied.current_count, 3);
    assert_eq!(denied.remaining, 0);
    assert_eq!(denied.reset_after, Duration::from_secs(30));

    // Other identifiers have their own counters
    let other = client
        .check_rate_limit_at("user2", 3, RateWindow::Minute, NOW)
        .await
        .unwrap();
    assert!(other.allowed);
    assert_eq!(other.current_count, 1);
}

#[tokio::test]
async fn test_rejections_do_not_inflate_counter() {
    let (remote, client) = mocked_client();

    for _ in 0..10 {
        client
            .check_rate_limit_at("burst", 2, RateWindow::Hour, NOW)
            .await
            .unwrap();
    }

    let key = RateWindow::Hour.counter_key("ratelimit", "burst", NOW);
    assert_eq!(remote.raw_get(&key), Some(b"2".to_vec()));
}

#[tokio::test]
async fn test_concurrent_rejections_report_at_most_limit() {
    let (remote, client) = mocked_client();
    remote.set_failure(Some(MockFailure::Slow(Duration::from_millis(1))));
    let client = Arc::new(client);

    let tasks = (0..10).map(|_| {
        let client = Arc::clone(&client);
        async move {
            client
                .check_rate_limit_at("crowd", 3, RateWindow::Minute, NOW)
                .await
        }
    });
    let statuses: Vec<_> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(statuses.iter().filter(|s| s.allowed).count(), 3);
    for denied in statuses.iter().filter(|s| !s.allowed) {
        assert_eq!(denied.current_count, 3);
        assert_eq!(denied.remaining, 0);
    }

    let key = RateWindow::Minute.counter_key("ratelimit", "crowd", NOW);
    assert_eq!(remote.raw_get(&key), Some(b"3".to_vec()));
}

#[tokio::test]
async fn test_counter_key_gets_window_ttl() {
    let (remote, client) = mocked_client();

    client
        .check_rate_limit_at("ttl_user", 5, RateWindow::Minute, NOW)
        .await
        .unwrap();

    let key = RateWindow::Minute.counter_key("ratelimit", "ttl_user", NOW);
    assert_eq!(remote.recorded_ttl(&key), Some(Duration::from_secs(120)));
}

#[tokio::test]
async fn test_counter_without_expiry_gets_window_ttl() {
    let (remote, client) = mocked_client();

    // A counter whose first increment never got its TTL
    let key = RateWindow::Minute.counter_key("ratelimit", "orphan", NOW);
    remote.raw_set(&key, b"5");

    let status = client
        .check_rate_limit_at("orphan", 10, RateWindow::Minute, NOW)
        .await
        .unwrap();

    assert!(status.allowed);
    assert_eq!(status.current_count, 6);
    assert_eq!(remote.recorded_ttl(&key), Some(Duration::from_secs(120)));
}

#[tokio::test]
async fn test_check_rate_limit_uses_current_window() {
    let (remote, client) = mocked_client();

    let status = client
        .check_rate_limit("live_user", 5, RateWindow::Day)
        .await
        .unwrap();

    assert!(status.allowed);
    assert_eq!(status.current_count, 1);
    assert!(status.reset_after <= Duration::from_secs(86_400));
    assert_eq!(remote.call_count(), 1);
}

#[tokio::test]
async fn test_key_prefix_is_configurable() {
    let mut config = test_config();
    config.key_prefix = "vessels".to_string();
    let client = ResilientStoreClient::fallback_only(config);

    client
        .check_rate_limit_at("imo9321483", 5, RateWindow::Day, NOW)
        .await
        .unwrap();

    let key = RateWindow::Day.counter_key("vessels", "imo9321483", NOW);
    assert!(client.fallback().exists(&key));
}

#[tokio::test]
async fn test_rate_limit_works_on_fallback() {
    let (remote, client) = mocked_client();
    remote.set_failure(Some(MockFailure::Unreachable));

    let first = client
        .check_rate_limit("user1", 1, RateWindow::Hour)
        .await
        .unwrap();
    let second = client
        .check_rate_limit("user1", 1, RateWindow::Hour)
        .await
        .unwrap();

    assert!(first.allowed);
    assert!(!second.allowed);
    assert_eq!(second.current_count, 1);
}

#[tokio::test]
async fn test_zero_limit_denies_everything() {
    let client = ResilientStoreClient::fallback_only(test_config());

    let status = client
        .check_rate_limit("nobody", 0, RateWindow::Second)
        .await
        .unwrap();
    assert!(!status.allowed);
    assert_eq!(status.current_count, 0);
}
