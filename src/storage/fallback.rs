// src/storage/fallback.rs

// In-memory fallback cache.
// Keeps serving reads and writes while Redis is unreachable. It is a bounded
// safety valve, not a general-purpose cache.
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::debug;

use crate::config::FallbackConfig;
use crate::error::{Result, StoreError};

// Stand-in expiry for TTLs too large to add to an Instant
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

/// A value held by the fallback cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheValue {
    /// Plain string value; counters are ASCII decimal like in Redis
    Bytes(Vec<u8>),
    /// Hash of field -> value
    Hash(HashMap<String, Vec<u8>>),
}

impl CacheValue {
    fn kind(&self) -> &'static str {
        match self {
            CacheValue::Bytes(_) => "string",
            CacheValue::Hash(_) => "hash",
        }
    }
}

/// Entry in the fallback cache
#[derive(Debug)]
struct CacheEntry {
    value: CacheValue,
    created_at: Instant,
    expires_at: Instant,
    // Insertion sequence, used for oldest-first eviction
    seq: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    order: BTreeMap<u64, String>,
    next_seq: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

impl CacheState {
    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.seq);
        Some(entry)
    }

    /// Look up a key, dropping it first if it has expired
    fn live_entry(&mut self, key: &str, now: Instant) -> Option<&mut CacheEntry> {
        let expired = self.entries.get(key)?.is_expired(now);
        if expired {
            self.remove(key);
            self.expirations += 1;
            return None;
        }
        self.entries.get_mut(key)
    }

    fn evict_oldest(&mut self) {
        if let Some((_, key)) = self.order.pop_first() {
            self.entries.remove(&key);
            self.evictions += 1;
            debug!(key = %key, "Evicted oldest fallback entry");
        }
    }

    fn insert(
        &mut self,
        key: &str,
        value: CacheValue,
        expires_at: Instant,
        now: Instant,
        max_entries: usize,
    ) {
        if self.remove(key).is_none() && self.entries.len() >= max_entries {
            self.evict_oldest();
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, key.to_string());
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                created_at: now,
                expires_at: expires_at.max(now),
                seq,
            },
        );
    }
}

/// Point-in-time statistics of the fallback cache
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FallbackStats {
    pub entries: usize,
    pub max_entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    /// Age of the oldest-inserted entry, a rough staleness indicator during outages
    pub oldest_entry_age_ms: Option<u64>,
}

/// Bounded, TTL-aware, thread-safe in-memory store.
///
/// All state sits behind one mutex; every critical section is a map lookup
/// or update and never spans an `.await`.
#[derive(Debug)]
pub struct FallbackCache {
    state: Mutex<CacheState>,
    config: FallbackConfig,
}

impl FallbackCache {
    pub fn new(config: FallbackConfig) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::with_capacity(config.max_entries.min(1024)),
                ..CacheState::default()
            }),
            config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn max_entries(&self) -> usize {
        self.config.max_entries.max(1)
    }

    fn expiry(&self, now: Instant, ttl: Option<Duration>) -> Instant {
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        now.checked_add(ttl).unwrap_or_else(|| now + FAR_FUTURE)
    }

    /// Store a value, evicting the oldest entry when full
    pub fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let now = Instant::now();
        let expires_at = self.expiry(now, ttl);
        let max_entries = self.max_entries();

        self.lock()
            .insert(key, CacheValue::Bytes(value), expires_at, now, max_entries);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut state = self.lock();
        let found = match state.live_entry(key, Instant::now()) {
            Some(entry) => match &entry.value {
                CacheValue::Bytes(bytes) => Some(bytes.clone()),
                other => return Err(wrong_type(key, other)),
            },
            None => None,
        };

        if found.is_some() {
            state.hits += 1;
        } else {
            state.misses += 1;
        }
        Ok(found)
    }

    pub fn exists(&self, key: &str) -> bool {
        self.lock().live_entry(key, Instant::now()).is_some()
    }

    /// Remove a key, returning how many entries were removed (0 or 1)
    pub fn delete(&self, key: &str) -> u64 {
        let mut state = self.lock();
        let now = Instant::now();
        match state.remove(key) {
            Some(entry) if !entry.is_expired(now) => 1,
            _ => 0,
        }
    }

    /// Add `delta` to an integer counter; a missing key counts from zero.
    pub fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        self.add(key, delta, None)
    }

    /// Like [`incr_by`](Self::incr_by), but a counter created here expires
    /// after `ttl`. A live counter keeps its expiry.
    pub fn incr_with_ttl(&self, key: &str, delta: i64, ttl: Duration) -> Result<i64> {
        self.add(key, delta, Some(ttl))
    }

    fn add(&self, key: &str, delta: i64, ttl: Option<Duration>) -> Result<i64> {
        let now = Instant::now();
        let new_expiry = self.expiry(now, ttl);
        let max_entries = self.max_entries();
        let mut state = self.lock();

        if let Some(entry) = state.live_entry(key, now) {
            let current = match &entry.value {
                CacheValue::Bytes(bytes) => parse_counter(key, bytes)?,
                other => return Err(wrong_type(key, other)),
            };
            let next = current.checked_add(delta).ok_or_else(|| {
                StoreError::InvalidArgument(format!(
                    "increment of '{}' by {} would overflow",
                    key, delta
                ))
            })?;
            entry.value = CacheValue::Bytes(next.to_string().into_bytes());
            return Ok(next);
        }

        state.insert(
            key,
            CacheValue::Bytes(delta.to_string().into_bytes()),
            new_expiry,
            now,
            max_entries,
        );
        Ok(delta)
    }

    /// Record a counter value obtained from Redis, keeping any live TTL.
    /// A counter not held yet expires after `ttl`, or the default TTL.
    pub fn store_counter(&self, key: &str, value: i64, ttl: Option<Duration>) {
        let now = Instant::now();
        let new_expiry = self.expiry(now, ttl);
        let max_entries = self.max_entries();
        let mut state = self.lock();

        let bytes = value.to_string().into_bytes();
        match state.live_entry(key, now) {
            Some(entry) => entry.value = CacheValue::Bytes(bytes),
            None => state.insert(
                key,
                CacheValue::Bytes(bytes),
                new_expiry,
                now,
                max_entries,
            ),
        }
    }

    /// Set a hash field, returning 1 if the field was added and 0 if it was updated
    pub fn hset(&self, key: &str, field: &str, value: Vec<u8>) -> Result<u64> {
        let now = Instant::now();
        let default_expiry = self.expiry(now, None);
        let max_entries = self.max_entries();
        let mut state = self.lock();

        if let Some(entry) = state.live_entry(key, now) {
            return match &mut entry.value {
                CacheValue::Hash(fields) => Ok(match fields.insert(field.to_string(), value) {
                    Some(_) => 0,
                    None => 1,
                }),
                other => Err(wrong_type(key, other)),
            };
        }

        let mut fields = HashMap::new();
        fields.insert(field.to_string(), value);
        state.insert(key, CacheValue::Hash(fields), default_expiry, now, max_entries);
        Ok(1)
    }

    pub fn hget(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>> {
        let mut state = self.lock();
        let found = match state.live_entry(key, Instant::now()) {
            Some(entry) => match &entry.value {
                CacheValue::Hash(fields) => fields.get(field).cloned(),
                other => return Err(wrong_type(key, other)),
            },
            None => None,
        };

        if found.is_some() {
            state.hits += 1;
        } else {
            state.misses += 1;
        }
        Ok(found)
    }

    pub fn hexists(&self, key: &str, field: &str) -> Result<bool> {
        let mut state = self.lock();
        match state.live_entry(key, Instant::now()) {
            Some(entry) => match &entry.value {
                CacheValue::Hash(fields) => Ok(fields.contains_key(field)),
                other => Err(wrong_type(key, other)),
            },
            None => Ok(false),
        }
    }

    /// Reset the expiry of a live key
    pub fn expire(&self, key: &str, ttl: Duration) -> bool {
        let now = Instant::now();
        let expires_at = self.expiry(now, Some(ttl));
        match self.lock().live_entry(key, now) {
            Some(entry) => {
                entry.expires_at = expires_at;
                true
            }
            None => false,
        }
    }

    /// Remaining time to live of a key
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.lock()
            .live_entry(key, now)
            .map(|entry| entry.expires_at.saturating_duration_since(now))
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.lock();

        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            state.remove(key);
        }
        state.expirations += expired.len() as u64;
        expired.len()
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.order.clear();
    }

    /// Number of stored entries, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> FallbackStats {
        let state = self.lock();
        let oldest_entry_age_ms = state
            .order
            .first_key_value()
            .and_then(|(_, key)| state.entries.get(key))
            .map(|entry| entry.created_at.elapsed().as_millis() as u64);

        FallbackStats {
            entries: state.entries.len(),
            max_entries: self.max_entries(),
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            expirations: state.expirations,
            oldest_entry_age_ms,
        }
    }

    /// Spawn the periodic purge task on the current tokio runtime.
    ///
    /// Returns `None` outside a runtime or for a zero interval.
    pub fn spawn_cleanup(self: &Arc<Self>, interval: Duration) -> Option<JoinHandle<()>> {
        if interval.is_zero() {
            return None;
        }
        let runtime = tokio::runtime::Handle::try_current().ok()?;
        let cache = Arc::clone(self);

        Some(runtime.spawn(async move {
            let mut ticker = time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let purged = cache.purge_expired();
                if purged > 0 {
                    debug!(purged, "Purged expired fallback entries");
                }
            }
        }))
    }
}

fn wrong_type(key: &str, value: &CacheValue) -> StoreError {
    StoreError::WrongType(format!("key '{}' holds a {} value", key, value.kind()))
}

fn parse_counter(key: &str, bytes: &[u8]) -> Result<i64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| {
            StoreError::InvalidArgument(format!("value of '{}' is not an integer", key))
        })
}
