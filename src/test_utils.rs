// src/test_utils.rs

use super::error::{Result, StoreError};
use super::storage::RemoteStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Failure mode injected into [`MockRemoteStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    /// Every call fails with a connectivity error
    Unreachable,
    /// Every call fails with a non-connectivity command error
    CommandError,
    /// Every call sleeps this long before answering
    Slow(Duration),
}

#[derive(Debug, Clone)]
enum MockValue {
    Bytes(Vec<u8>),
    Hash(HashMap<String, Vec<u8>>),
}

#[derive(Debug, Default)]
struct MockState {
    data: HashMap<String, MockValue>,
    expiry: HashMap<String, Instant>,
    ttls: HashMap<String, Duration>,
}

impl MockState {
    fn purge(&mut self, key: &str) {
        if let Some(at) = self.expiry.get(key) {
            if *at <= Instant::now() {
                self.data.remove(key);
                self.expiry.remove(key);
            }
        }
    }
}

/// In-memory stand-in for Redis with injectable failures
#[derive(Debug, Default)]
pub struct MockRemoteStore {
    state: Mutex<MockState>,
    failure: Mutex<Option<MockFailure>>,
    calls: AtomicUsize,
}

impl MockRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failure(&self, failure: Option<MockFailure>) {
        *self.failure.lock().unwrap() = failure;
    }

    /// Number of calls that reached the store, failed ones included
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Raw value as stored, bypassing failure injection
    pub fn raw_get(&self, key: &str) -> Option<Vec<u8>> {
        let mut state = self.state.lock().unwrap();
        state.purge(key);
        match state.data.get(key) {
            Some(MockValue::Bytes(bytes)) => Some(bytes.clone()),
            _ => None,
        }
    }

    pub fn raw_set(&self, key: &str, value: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .data
            .insert(key.to_string(), MockValue::Bytes(value.to_vec()));
    }

    /// Last TTL applied to `key` via set, expire or incr_with_ttl
    pub fn recorded_ttl(&self, key: &str) -> Option<Duration> {
        self.state.lock().unwrap().ttls.get(key).copied()
    }

    async fn enter(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failure = *self.failure.lock().unwrap();
        match failure {
            Some(MockFailure::Unreachable) => {
                Err(StoreError::Connectivity("connection refused".to_string()))
            }
            Some(MockFailure::CommandError) => {
                Err(StoreError::Command("ERR injected failure".to_string()))
            }
            Some(MockFailure::Slow(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn increment(state: &mut MockState, key: &str, delta: i64) -> Result<i64> {
        let current = match state.data.get(key) {
            Some(MockValue::Bytes(bytes)) => std::str::from_utf8(bytes)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or_else(|| {
                    StoreError::InvalidArgument("value is not an integer".to_string())
                })?,
            Some(MockValue::Hash(_)) => return Err(StoreError::WrongType(key.to_string())),
            None => 0,
        };
        let next = current + delta;
        state.data.insert(
            key.to_string(),
            MockValue::Bytes(next.to_string().into_bytes()),
        );
        Ok(next)
    }

    fn apply_ttl(state: &mut MockState, key: &str, ttl: Duration) {
        state.expiry.insert(key.to_string(), Instant::now() + ttl);
        state.ttls.insert(key.to_string(), ttl);
    }
}

#[async_trait]
impl RemoteStore for MockRemoteStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.enter().await?;
        let mut state = self.state.lock().unwrap();
        state.purge(key);
        match state.data.get(key) {
            Some(MockValue::Bytes(bytes)) => Ok(Some(bytes.clone())),
            Some(MockValue::Hash(_)) => Err(StoreError::WrongType(key.to_string())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        self.enter().await?;
        let mut state = self.state.lock().unwrap();
        state
            .data
            .insert(key.to_string(), MockValue::Bytes(value.to_vec()));
        state.expiry.remove(key);
        if let Some(ttl) = ttl {
            Self::apply_ttl(&mut state, key, ttl);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<u64> {
        self.enter().await?;
        let mut state = self.state.lock().unwrap();
        state.purge(key);
        state.expiry.remove(key);
        Ok(state.data.remove(key).map_or(0, |_| 1))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.enter().await?;
        let mut state = self.state.lock().unwrap();
        state.purge(key);
        Ok(state.data.contains_key(key))
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        self.enter().await?;
        let mut state = self.state.lock().unwrap();
        state.purge(key);
        Self::increment(&mut state, key, delta)
    }

    async fn incr_with_ttl(&self, key: &str, delta: i64, ttl: Duration) -> Result<i64> {
        self.enter().await?;
        let mut state = self.state.lock().unwrap();
        state.purge(key);
        let next = Self::increment(&mut state, key, delta)?;
        if !state.expiry.contains_key(key) {
            Self::apply_ttl(&mut state, key, ttl);
        }
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.enter().await?;
        let mut state = self.state.lock().unwrap();
        state.purge(key);
        if state.data.contains_key(key) {
            Self::apply_ttl(&mut state, key, ttl);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn hset(&self, key: &str, field: &str, value: &[u8]) -> Result<u64> {
        self.enter().await?;
        let mut state = self.state.lock().unwrap();
        state.purge(key);
        let entry = state
            .data
            .entry(key.to_string())
            .or_insert_with(|| MockValue::Hash(HashMap::new()));
        match entry {
            MockValue::Hash(fields) => Ok(fields
                .insert(field.to_string(), value.to_vec())
                .map_or(1, |_| 0)),
            MockValue::Bytes(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>> {
        self.enter().await?;
        let mut state = self.state.lock().unwrap();
        state.purge(key);
        match state.data.get(key) {
            Some(MockValue::Hash(fields)) => Ok(fields.get(field).cloned()),
            Some(MockValue::Bytes(_)) => Err(StoreError::WrongType(key.to_string())),
            None => Ok(None),
        }
    }

    async fn hexists(&self, key: &str, field: &str) -> Result<bool> {
        Ok(self.hget(key, field).await?.is_some())
    }

    async fn ping(&self) -> Result<()> {
        self.enter().await
    }

    async fn info(&self) -> Result<String> {
        self.enter().await?;
        Ok("# Server\r\nredis_version:7.2.4\r\nredis_mode:standalone\r\n\r\n# Clients\r\nconnected_clients:1\r\n".to_string())
    }
}
