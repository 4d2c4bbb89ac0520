// src/storage/mod.rs

pub mod fallback;
pub mod redis;

#[cfg(test)]
mod tests;

pub use fallback::{CacheValue, FallbackCache, FallbackStats};
pub use redis::RedisStore;

use super::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Debug;
use std::time::Duration;

/// The remote key-value store the client guards.
///
/// Implementations report unreachability as connectivity-class errors
/// (see [`StoreError::is_connectivity`](crate::StoreError::is_connectivity)) so the
/// circuit breaker can tell an outage apart from a bad request.
#[async_trait]
pub trait RemoteStore: Send + Sync + Debug {
    // Retrieves a value by key
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    // Stores a value, optionally expiring after `ttl`
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()>;

    // Deletes a key, returning the number of keys removed
    async fn delete(&self, key: &str) -> Result<u64>;

    // Checks if a key exists
    async fn exists(&self, key: &str) -> Result<bool>;

    // Atomically adds `delta` to an integer counter
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64>;

    // Like `incr_by`, and in the same round trip gives the key `ttl` if it
    // has no expiry yet
    async fn incr_with_ttl(&self, key: &str, delta: i64, ttl: Duration) -> Result<i64>;

    // Sets expiration time for a key
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    // Sets a hash field, returning 1 if the field is new
    async fn hset(&self, key: &str, field: &str, value: &[u8]) -> Result<u64>;

    async fn hget(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>>;

    async fn hexists(&self, key: &str, field: &str) -> Result<bool>;

    // Liveness probe
    async fn ping(&self) -> Result<()>;

    // Raw server INFO text
    async fn info(&self) -> Result<String>;
}

/// Parse the `field:value` lines of a Redis INFO reply, skipping section headers.
pub fn parse_info(raw: &str) -> HashMap<String, String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
