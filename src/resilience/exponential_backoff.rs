use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::Result;

/// Exponential backoff implementation for retries
pub struct ExponentialBackoff {
    /// Current attempt number
    current_attempt: usize,
    /// Configuration for the retry strategy
    config: RetryConfig,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff with the given configuration
    pub fn new(config: RetryConfig) -> Self {
        Self {
            current_attempt: 0,
            config,
        }
    }

    /// Get the next backoff duration, or None if max attempts reached
    pub fn next_backoff(&mut self) -> Option<Duration> {
        self.current_attempt += 1;

        if self.current_attempt > self.config.max_attempts {
            return None;
        }

        let exp = self.current_attempt as f64 - 1.0;
        let base_ms = self.config.initial_backoff.as_millis() as f64;
        let backoff_ms = base_ms * self.config.backoff_multiplier.powf(exp);
        let max_ms = self.config.max_backoff.as_millis() as f64;
        let capped_ms = backoff_ms.min(max_ms);

        let jittered_ms = if self.config.use_jitter {
            // Random value between 50% and 100% of the calculated backoff
            let jitter = rand::random::<f64>() * 0.5 + 0.5;
            (capped_ms * jitter) as u64
        } else {
            capped_ms as u64
        };

        Some(Duration::from_millis(jittered_ms))
    }

    /// Number of backoffs handed out so far
    pub fn attempts(&self) -> usize {
        self.current_attempt.min(self.config.max_attempts)
    }

    /// Reset the backoff to start from the beginning
    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }
}

/// Run `attempt` until it succeeds, sleeping between tries.
///
/// Only connectivity errors are retried; anything else is returned at once.
/// Makes at most `1 + config.max_attempts` attempts.
pub async fn retry<T, F, Fut>(config: &RetryConfig, operation: &str, mut attempt: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = ExponentialBackoff::new(config.clone());

    loop {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_connectivity() => match backoff.next_backoff() {
                Some(delay) => {
                    debug!(
                        operation,
                        attempt = backoff.attempts(),
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    warn!(operation, attempts = config.max_attempts + 1, error = %e, "Giving up after retries");
                    return Err(e);
                }
            },
            Err(e) => return Err(e),
        }
    }
}
