// src/resilience/tests/exponential_backoff_tests.rs

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::StoreError;
use crate::resilience::{retry, ExponentialBackoff};

fn config(max_attempts: usize, max_backoff: Duration, use_jitter: bool) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_backoff: Duration::from_millis(100),
        max_backoff,
        backoff_multiplier: 2.0,
        use_jitter,
    }
}

#[test]
fn test_backoff_increases_exponentially() {
    let mut backoff = ExponentialBackoff::new(config(4, Duration::from_secs(10), false));

    assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(100)));
    assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(200)));
    assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(400)));
    assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(800)));
    assert_eq!(backoff.next_backoff(), None);
    assert_eq!(backoff.attempts(), 4);
}

#[test]
fn test_backoff_respects_max_backoff() {
    let mut backoff = ExponentialBackoff::new(config(5, Duration::from_millis(300), false));

    assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(100)));
    assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(200)));
    assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(300)));
    assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(300)));
}

#[test]
fn test_jitter_stays_within_bounds() {
    let mut backoff = ExponentialBackoff::new(config(3, Duration::from_secs(10), true));

    let first = backoff.next_backoff().unwrap();
    assert!(first >= Duration::from_millis(50) && first <= Duration::from_millis(100));

    let second = backoff.next_backoff().unwrap();
    assert!(second >= Duration::from_millis(100) && second <= Duration::from_millis(200));
}

#[test]
fn test_backoff_reset() {
    let mut backoff = ExponentialBackoff::new(config(2, Duration::from_secs(10), false));
    backoff.next_backoff();
    backoff.next_backoff();
    assert_eq!(backoff.next_backoff(), None);

    backoff.reset();
    assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(100)));
}

#[tokio::test]
async fn test_retry_recovers_after_connectivity_errors() {
    let counter = AtomicUsize::new(0);
    let attempts = &counter;

    let result = retry(&config(3, Duration::from_secs(1), false), "test", || async move {
        if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
            Err(StoreError::Connectivity("down".to_string()))
        } else {
            Ok(7)
        }
    })
    .await;

    assert_eq!(result.unwrap(), 7);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_retry_gives_up() {
    let counter = AtomicUsize::new(0);
    let attempts = &counter;

    let result: crate::error::Result<()> =
        retry(&config(2, Duration::from_secs(1), false), "test", || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Connectivity("down".to_string()))
        })
        .await;

    assert!(matches!(result, Err(StoreError::Connectivity(_))));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_retry_does_not_retry_logical_errors() {
    let counter = AtomicUsize::new(0);
    let attempts = &counter;

    let result: crate::error::Result<()> =
        retry(&config(5, Duration::from_secs(1), false), "test", || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Config("bad url".to_string()))
        })
        .await;

    assert!(matches!(result, Err(StoreError::Config(_))));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}
