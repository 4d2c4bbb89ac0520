// src/storage/tests/mod.rs


// Common utilities for storage tests
pub(crate) mod common {
    use std::time::Duration;

    use crate::config::FallbackConfig;
    use crate::storage::FallbackCache;

    /// Fallback cache without a background purge task
    pub fn cache(max_entries: usize, default_ttl: Duration) -> FallbackCache {
        FallbackCache::new(FallbackConfig {
            max_entries,
            default_ttl,
            cleanup_interval: None,
        })
    }
}
