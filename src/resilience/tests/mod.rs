// src/resilience/tests/mod.rs
//! Tests for resilience features

mod exponential_backoff_tests;

// Common test utilities for resilience testing
pub(crate) mod utils {
    use std::time::Duration;

    use crate::config::CircuitBreakerConfig;
    use crate::error::{Result, StoreError};
    use crate::resilience::CircuitBreaker;

    pub fn breaker(failure_threshold: u32, recovery_timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold,
                recovery_timeout,
            },
        )
    }

    pub async fn unreachable() -> Result<()> {
        Err(StoreError::Connectivity("connection refused".to_string()))
    }

    pub async fn ok() -> Result<()> {
        Ok(())
    }
}
