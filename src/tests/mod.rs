// src/tests/mod.rs
//! End-to-end tests of the client over an in-memory remote store

mod monitor_tests;
mod rate_limit_tests;

pub(crate) mod common {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::client::ResilientStoreClient;
    use crate::config::{CircuitBreakerConfig, ClientConfig, RedisConfig, RetryConfig};
    use crate::test_utils::MockRemoteStore;

    /// Small timeouts and no purge task
    pub fn test_config() -> ClientConfig {
        let mut config = ClientConfig::default();
        config.redis = RedisConfig {
            connection_timeout: Duration::from_millis(200),
            command_timeout: Duration::from_millis(100),
        };
        config.fallback.cleanup_interval = None;
        config.circuit_breaker = CircuitBreakerConfig {
            failure_threshold: 3,
            recovery_timeout: Duration::from_millis(100),
        };
        config.retry = RetryConfig {
            max_attempts: 1,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(20),
            backoff_multiplier: 2.0,
            use_jitter: false,
        };
        config
    }

    pub fn mocked_client() -> (Arc<MockRemoteStore>, ResilientStoreClient) {
        let remote = Arc::new(MockRemoteStore::new());
        let client = ResilientStoreClient::with_remote(remote.clone(), test_config());
        (remote, client)
    }
}
