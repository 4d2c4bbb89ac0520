// src/client.rs

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::error::{Result, StoreError};
use crate::metrics::{ComprehensiveMetrics, MetricsRegistry, ResponseCategory};
use crate::rate_limit::{unix_now, RateLimitStatus, RateWindow};
use crate::resilience::{self, CircuitBreaker, CircuitState, HealthMonitor, HealthReport};
use crate::storage::{parse_info, FallbackCache, RedisStore, RemoteStore};
use crate::{fallback_event, store_op};

/// Resilient front for a Redis-style key-value store.
///
/// Every operation goes to Redis through a circuit breaker and, when Redis
/// is unreachable, is served by a bounded in-memory fallback cache instead.
/// Callers only ever see an error when both paths fail.
///
/// # Architecture
///
/// ```plaintext
/// ┌─────────────┐
/// │ Application │
/// └─────────────┘
///        │
///        ▼
/// ┌──────────────────────┐      ┌─────────────────┐
/// │ ResilientStoreClient │─────►│ MetricsRegistry │
/// └──────────────────────┘      └─────────────────┘
///        │
///        ├─────────────────────┐
///        ▼                     ▼
/// ┌────────────────┐    ┌───────────────┐
/// │ Circuit Breaker│    │ FallbackCache │
/// └────────────────┘    └───────────────┘
///        │
///        ▼
/// ┌─────────────┐
/// │    Redis    │
/// └─────────────┘
/// ```
///
/// The client is meant to be built once by the application and shared as an
/// `Arc<ResilientStoreClient>`.
pub struct ResilientStoreClient {
    id: Uuid,
    url: Option<String>,
    config: ClientConfig,
    remote: RwLock<Option<Arc<dyn RemoteStore>>>,
    fallback: Arc<FallbackCache>,
    breaker: Arc<CircuitBreaker>,
    metrics: Arc<MetricsRegistry>,
    health: HealthMonitor,
    closed: AtomicBool,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for ResilientStoreClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientStoreClient")
            .field("id", &self.id)
            .field(
                "url",
                &self.url.as_deref().map(crate::storage::redis::redact_url),
            )
            .field("connected", &self.is_connected())
            .field("circuit", &self.breaker.state())
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl ResilientStoreClient {
    /// Build a client for `url`, or a fallback-only client when `url` is `None`.
    ///
    /// A malformed URL is a configuration error. An unreachable server is
    /// not: the client starts on the fallback cache and can
    /// [`reconnect`](Self::reconnect) later.
    pub async fn new(url: Option<&str>, config: ClientConfig) -> Result<Self> {
        let url = url.map(str::trim).filter(|u| !u.is_empty());
        let redis_client = url.map(RedisStore::open).transpose()?;

        let client = Self::build(url.map(str::to_string), config);

        match redis_client {
            Some(redis_client) => {
                match RedisStore::connect(redis_client, client.config.redis.clone()).await {
                    Ok(store) => {
                        client.install_remote(Arc::new(store));
                        info!(client_id = %client.id, "Resilient store client connected to Redis");
                    }
                    Err(e) => {
                        warn!(
                            client_id = %client.id,
                            error_class = e.error_class(),
                            error = %e,
                            "Redis unreachable at startup, serving from fallback cache"
                        );
                    }
                }
            }
            None => {
                info!(client_id = %client.id, "No Redis URL configured, using fallback cache only");
            }
        }

        Ok(client)
    }

    /// Build a client over an already-constructed remote store
    pub fn with_remote(remote: Arc<dyn RemoteStore>, config: ClientConfig) -> Self {
        let client = Self::build(None, config);
        client.install_remote(remote);
        client
    }

    /// Build a client that only ever uses the fallback cache
    pub fn fallback_only(config: ClientConfig) -> Self {
        Self::build(None, config)
    }

    fn build(url: Option<String>, config: ClientConfig) -> Self {
        let fallback = Arc::new(FallbackCache::new(config.fallback.clone()));
        let cleanup_task = config
            .fallback
            .cleanup_interval
            .and_then(|interval| fallback.spawn_cleanup(interval));

        Self {
            id: Uuid::new_v4(),
            url,
            breaker: Arc::new(CircuitBreaker::new(
                "redis",
                config.circuit_breaker.clone(),
            )),
            metrics: Arc::new(MetricsRegistry::new()),
            health: HealthMonitor::new(config.health.clone()),
            remote: RwLock::new(None),
            fallback,
            closed: AtomicBool::new(false),
            cleanup_task: Mutex::new(cleanup_task),
            config,
        }
    }

    fn install_remote(&self, remote: Arc<dyn RemoteStore>) {
        *self.remote.write().unwrap_or_else(PoisonError::into_inner) = Some(remote);
    }

    // Clone the handle out so no lock is held across an await
    fn remote(&self) -> Option<Arc<dyn RemoteStore>> {
        self.remote
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run an operation against Redis through the breaker, falling back on failure.
    ///
    /// `mirror` copies a successful remote result into the fallback cache so
    /// it stays warm; its errors are logged and dropped.
    async fn execute<T, R, Fut, F, M>(
        &self,
        operation: &'static str,
        key: &str,
        remote_op: R,
        fallback_op: F,
        mirror: M,
    ) -> Result<T>
    where
        R: FnOnce(Arc<dyn RemoteStore>) -> Fut,
        Fut: Future<Output = Result<T>>,
        F: FnOnce(&FallbackCache) -> Result<T>,
        M: FnOnce(&FallbackCache, &T) -> Result<()>,
    {
        let started = Instant::now();
        self.metrics.record_request(operation);

        let remote_error = match self.remote() {
            Some(remote) => {
                let timeout = self.config.redis.command_timeout;
                let outcome = self
                    .breaker
                    .call(move || async move {
                        match tokio::time::timeout(timeout, remote_op(remote)).await {
                            Ok(result) => result,
                            Err(_) => Err(StoreError::Timeout {
                                operation: operation.to_string(),
                                after: timeout,
                            }),
                        }
                    })
                    .await;

                match outcome {
                    Ok(value) => {
                        let elapsed = started.elapsed();
                        self.metrics.record_redis_hit(operation, elapsed);
                        if let Err(e) = mirror(&self.fallback, &value) {
                            debug!(operation, key, error = %e, "Could not mirror write into fallback cache");
                        }
                        store_op!(operation, key, "redis", elapsed.as_millis() as u64);
                        return Ok(value);
                    }
                    Err(e) => {
                        self.metrics.record_failure(operation, &e);
                        fallback_event!(operation, key, e);
                        Some(e)
                    }
                }
            }
            None => None,
        };

        match fallback_op(&self.fallback) {
            Ok(value) => {
                let elapsed = started.elapsed();
                self.metrics.record_fallback_hit(operation, elapsed);
                store_op!(operation, key, "fallback", elapsed.as_millis() as u64);
                Ok(value)
            }
            Err(fallback_error) => {
                self.metrics.record_fallback_error(operation);
                let remote = remote_error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "not connected".to_string());
                error!(
                    operation,
                    key,
                    error_class = fallback_error.error_class(),
                    error = %fallback_error,
                    remote = %remote,
                    "Operation failed on Redis and on fallback cache"
                );
                Err(StoreError::FallbackExhausted {
                    operation: operation.to_string(),
                    key: key.to_string(),
                    remote,
                    source: Box::new(fallback_error),
                })
            }
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.execute(
            "get",
            key,
            |remote| async move { remote.get(key).await },
            |fallback| fallback.get(key),
            |_, _| Ok(()),
        )
        .await
    }

    /// Store `value`, expiring after `ttl` if given
    pub async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        self.execute(
            "set",
            key,
            |remote| async move { remote.set(key, value, ttl).await },
            |fallback| fallback.set(key, value.to_vec(), ttl),
            |fallback, _| fallback.set(key, value.to_vec(), ttl),
        )
        .await
    }

    /// Delete a key, returning the number of keys removed (0 or 1)
    pub async fn delete(&self, key: &str) -> Result<u64> {
        self.execute(
            "delete",
            key,
            |remote| async move { remote.delete(key).await },
            |fallback| Ok(fallback.delete(key)),
            |fallback, _| {
                fallback.delete(key);
                Ok(())
            },
        )
        .await
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        self.execute(
            "exists",
            key,
            |remote| async move { remote.exists(key).await },
            |fallback| Ok(fallback.exists(key)),
            |_, _| Ok(()),
        )
        .await
    }

    /// Add `amount` to an integer counter, returning the new value
    pub async fn incr(&self, key: &str, amount: i64) -> Result<i64> {
        self.execute(
            "incr",
            key,
            |remote| async move { remote.incr_by(key, amount).await },
            |fallback| fallback.incr_by(key, amount),
            |fallback, value| {
                fallback.store_counter(key, *value, None);
                Ok(())
            },
        )
        .await
    }

    /// Add `amount` to a counter and give it `ttl` if it has no expiry yet.
    ///
    /// The increment and the expiry are applied together, so a counter never
    /// outlives its window because a separate EXPIRE was lost.
    pub async fn incr_with_ttl(&self, key: &str, amount: i64, ttl: Duration) -> Result<i64> {
        self.execute(
            "incr",
            key,
            |remote| async move { remote.incr_with_ttl(key, amount, ttl).await },
            |fallback| fallback.incr_with_ttl(key, amount, ttl),
            |fallback, value| {
                fallback.store_counter(key, *value, Some(ttl));
                Ok(())
            },
        )
        .await
    }

    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.execute(
            "expire",
            key,
            |remote| async move { remote.expire(key, ttl).await },
            |fallback| Ok(fallback.expire(key, ttl)),
            |fallback, _| {
                fallback.expire(key, ttl);
                Ok(())
            },
        )
        .await
    }

    /// Set a hash field, returning 1 if the field is new and 0 if it was updated
    pub async fn hset(&self, key: &str, field: &str, value: &[u8]) -> Result<u64> {
        self.execute(
            "hset",
            key,
            |remote| async move { remote.hset(key, field, value).await },
            |fallback| fallback.hset(key, field, value.to_vec()),
            |fallback, _| fallback.hset(key, field, value.to_vec()).map(|_| ()),
        )
        .await
    }

    pub async fn hget(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>> {
        self.execute(
            "hget",
            key,
            |remote| async move { remote.hget(key, field).await },
            |fallback| fallback.hget(key, field),
            |_, _| Ok(()),
        )
        .await
    }

    pub async fn hexists(&self, key: &str, field: &str) -> Result<bool> {
        self.execute(
            "hexists",
            key,
            |remote| async move { remote.hexists(key, field).await },
            |fallback| fallback.hexists(key, field),
            |_, _| Ok(()),
        )
        .await
    }

    /// Read and decode a JSON value
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Encode and store a value as JSON
    pub async fn set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.set(key, &bytes, ttl).await
    }

    /// True only if Redis answered a PING within the probe timeout.
    ///
    /// Does not go through the circuit breaker and never fails.
    pub async fn ping(&self) -> bool {
        match self.remote() {
            Some(remote) => {
                resilience::probe(remote.as_ref(), self.config.health.probe_timeout)
                    .await
                    .available
            }
            None => false,
        }
    }

    /// Current health, cached for `HealthConfig::cache_ttl`
    pub async fn health_check(&self) -> HealthReport {
        self.health
            .report(|| async {
                let outcome = match self.remote() {
                    Some(remote) => {
                        Some(resilience::probe(remote.as_ref(), self.config.health.probe_timeout).await)
                    }
                    None => None,
                };

                let redis_available = outcome.map_or(false, |o| o.available);
                let response_time_ms = outcome.and_then(|o| o.response_time_ms());
                let circuit_breaker_state = self.breaker.state();

                HealthReport {
                    redis_available,
                    response_time_ms,
                    response_category: response_time_ms.map(ResponseCategory::from_millis),
                    circuit_breaker_state,
                    fallback_active: !redis_available
                        || circuit_breaker_state != CircuitState::Closed,
                    fallback_entries: self.fallback.len(),
                    checked_at: Utc::now(),
                }
            })
            .await
    }

    /// Count a request for `identifier` in the current fixed window.
    ///
    /// Counters live at `{key_prefix}:{identifier}:{window}:{bucket}` and go
    /// through the same Redis-or-fallback path as every other operation. A
    /// rejected request is not counted, and a rejection always reports a
    /// count no higher than `max_count`.
    pub async fn check_rate_limit(
        &self,
        identifier: &str,
        max_count: u64,
        window: RateWindow,
    ) -> Result<RateLimitStatus> {
        self.check_rate_limit_at(identifier, max_count, window, unix_now())
            .await
    }

    pub(crate) async fn check_rate_limit_at(
        &self,
        identifier: &str,
        max_count: u64,
        window: RateWindow,
        now: u64,
    ) -> Result<RateLimitStatus> {
        let key = window.counter_key(&self.config.key_prefix, identifier, now);
        let limit = i64::try_from(max_count).unwrap_or(i64::MAX);

        let count = self
            .incr_with_ttl(&key, 1, window.counter_ttl())
            .await?;

        if count > limit {
            // Undo this request's increment so rejected calls don't inflate the count.
            // Concurrent rejections may not have undone theirs yet.
            let current = self.incr(&key, -1).await?.clamp(0, limit);
            debug!(identifier, window = %window, count = current, limit = max_count, "Rate limit exceeded");
            return Ok(RateLimitStatus::new(
                false,
                current as u64,
                max_count,
                window,
                now,
            ));
        }

        Ok(RateLimitStatus::new(
            true,
            count.max(0) as u64,
            max_count,
            window,
            now,
        ))
    }

    /// Parsed Redis INFO, or `None` when Redis is unavailable
    pub async fn server_info(&self) -> Option<HashMap<String, String>> {
        let remote = self.remote()?;
        let timeout = self.config.redis.command_timeout;

        let result = self
            .breaker
            .call(|| async move {
                match tokio::time::timeout(timeout, remote.info()).await {
                    Ok(result) => result,
                    Err(_) => Err(StoreError::Timeout {
                        operation: "info".to_string(),
                        after: timeout,
                    }),
                }
            })
            .await;

        match result {
            Ok(raw) => Some(parse_info(&raw)),
            Err(e) => {
                warn!(operation = "info", error_class = e.error_class(), error = %e, "Could not read Redis INFO");
                None
            }
        }
    }

    /// Re-establish the Redis connection.
    ///
    /// Without `force`, a connection that still answers PING is kept.
    /// Otherwise a new connection is made with exponential backoff; on
    /// success the circuit is force-closed and the health cache dropped.
    pub async fn reconnect(&self, force: bool) -> bool {
        if !force && self.ping().await {
            debug!(client_id = %self.id, "Existing Redis connection is healthy");
            return true;
        }

        let Some(url) = self.url.as_deref() else {
            warn!(client_id = %self.id, "Cannot reconnect, no Redis URL configured");
            return false;
        };

        let redis_client = match RedisStore::open(url) {
            Ok(redis_client) => redis_client,
            Err(e) => {
                error!(client_id = %self.id, error = %e, "Cannot reconnect");
                return false;
            }
        };

        let redis_config = self.config.redis.clone();
        let connected = resilience::retry(&self.config.retry, "reconnect", || {
            RedisStore::connect(redis_client.clone(), redis_config.clone())
        })
        .await;

        match connected {
            Ok(store) => {
                self.install_remote(Arc::new(store));
                self.closed.store(false, Ordering::SeqCst);
                self.breaker.force_close("reconnected");
                self.health.invalidate().await;
                info!(client_id = %self.id, "Reconnected to Redis");
                true
            }
            Err(e) => {
                warn!(
                    client_id = %self.id,
                    error_class = e.error_class(),
                    error = %e,
                    "Reconnect failed, staying on fallback cache"
                );
                false
            }
        }
    }

    /// Drop the Redis connection and stop background work.
    ///
    /// Idempotent. Operations keep working afterwards, served by the
    /// fallback cache.
    pub async fn close(&self) {
        let already_closed = self.closed.swap(true, Ordering::SeqCst);

        self.remote
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = self
            .cleanup_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        self.health.invalidate().await;

        if already_closed {
            debug!(client_id = %self.id, "Client already closed");
        } else {
            info!(client_id = %self.id, "Resilient store client closed");
        }
    }

    /// Snapshot combining counters, breaker and fallback statistics
    pub fn get_comprehensive_metrics(&self) -> ComprehensiveMetrics {
        ComprehensiveMetrics::new(
            self.id,
            self.url.is_some() || self.is_connected(),
            self.is_connected(),
            self.metrics.snapshot(),
            self.breaker.stats(),
            self.fallback.stats(),
        )
    }

    /// Admin action: zero all counters
    pub fn reset_metrics(&self) {
        self.metrics.reset();
        info!(client_id = %self.id, "Metrics reset");
    }

    /// Admin action: close the circuit after manual remediation
    pub fn force_close_circuit(&self, reason: &str) {
        self.breaker.force_close(reason);
    }

    pub fn is_connected(&self) -> bool {
        self.remote
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn client_id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn circuit_breaker(&self) -> Arc<CircuitBreaker> {
        Arc::clone(&self.breaker)
    }

    pub fn fallback(&self) -> Arc<FallbackCache> {
        Arc::clone(&self.fallback)
    }

    pub fn metrics(&self) -> Arc<MetricsRegistry> {
        Arc::clone(&self.metrics)
    }
}

impl Drop for ResilientStoreClient {
    fn drop(&mut self) {
        if let Some(task) = self
            .cleanup_task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}
