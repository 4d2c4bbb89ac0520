// src/config/mod.rs

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, StoreError};

/// Top-level configuration for a [`ResilientStoreClient`](crate::ResilientStoreClient)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Key prefix used for rate-limit counters
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    #[serde(default)]
    pub redis: RedisConfig,

    #[serde(default)]
    pub fallback: FallbackConfig,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub health: HealthConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            redis: RedisConfig::default(),
            fallback: FallbackConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Parse a configuration document; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| StoreError::Config(e.to_string()))
    }
}

fn default_key_prefix() -> String {
    "ratelimit".to_string()
}

/// Configuration for the Redis connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Timeout for establishing the connection
    #[serde(default = "default_conn_timeout", with = "duration_serde")]
    pub connection_timeout: Duration,

    /// Timeout applied to every command
    #[serde(default = "default_command_timeout", with = "duration_serde")]
    pub command_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            connection_timeout: default_conn_timeout(),
            command_timeout: default_command_timeout(),
        }
    }
}

fn default_conn_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_command_timeout() -> Duration {
    Duration::from_secs(2)
}

/// Configuration for the in-memory fallback cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    /// Maximum number of entries to store
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// TTL applied when a write does not carry one
    #[serde(default = "default_ttl", with = "duration_serde")]
    pub default_ttl: Duration,

    /// How often to purge expired entries in the background; `None` disables it
    #[serde(default = "default_cleanup_interval", with = "option_duration_serde")]
    pub cleanup_interval: Option<Duration>,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            default_ttl: default_ttl(),
            cleanup_interval: default_cleanup_interval(),
        }
    }
}

fn default_max_entries() -> usize {
    500
}

fn default_ttl() -> Duration {
    Duration::from_secs(300)
}

fn default_cleanup_interval() -> Option<Duration> {
    Some(Duration::from_secs(60))
}

/// Configuration for circuit breaker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive connectivity failures before opening the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Duration to keep the circuit open before allowing a trial call
    #[serde(default = "default_recovery_timeout", with = "duration_serde")]
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout: default_recovery_timeout(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Configuration for connection retry strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Initial backoff duration
    #[serde(default = "default_initial_backoff", with = "duration_serde")]
    pub initial_backoff: Duration,

    /// Maximum backoff duration
    #[serde(default = "default_max_backoff", with = "duration_serde")]
    pub max_backoff: Duration,

    /// Multiplier for exponential backoff
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Whether to add jitter to backoff
    #[serde(default = "default_use_jitter")]
    pub use_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
            backoff_multiplier: default_backoff_multiplier(),
            use_jitter: default_use_jitter(),
        }
    }
}

fn default_max_attempts() -> usize {
    3
}

fn default_initial_backoff() -> Duration {
    Duration::from_millis(100)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(5)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_use_jitter() -> bool {
    true
}

/// Configuration for health checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// How long a health report is served from cache
    #[serde(default = "default_health_cache_ttl", with = "duration_serde")]
    pub cache_ttl: Duration,

    /// Timeout for the liveness probe
    #[serde(default = "default_probe_timeout", with = "duration_serde")]
    pub probe_timeout: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            cache_ttl: default_health_cache_ttl(),
            probe_timeout: default_probe_timeout(),
        }
    }
}

fn default_health_cache_ttl() -> Duration {
    Duration::from_secs(5)
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(1)
}

/// Build a configuration from environment variables.
///
/// Returns the Redis URL (if `REDIS_URL` is set and non-empty) together with the config.
pub fn from_env() -> Result<(Option<String>, ClientConfig)> {
    from_lookup(|name| std::env::var(name).ok())
}

fn from_lookup<F>(lookup: F) -> Result<(Option<String>, ClientConfig)>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = ClientConfig::default();

    let url = lookup("REDIS_URL").filter(|url| !url.trim().is_empty());

    if let Some(prefix) = lookup("STORE_KEY_PREFIX") {
        config.key_prefix = prefix;
    }
    if let Some(max) = parse_var::<usize, _>(&lookup, "STORE_FALLBACK_MAX_ENTRIES")? {
        config.fallback.max_entries = max;
    }
    if let Some(secs) = parse_var::<u64, _>(&lookup, "STORE_FALLBACK_TTL_SECS")? {
        config.fallback.default_ttl = Duration::from_secs(secs);
    }
    if let Some(threshold) = parse_var::<u32, _>(&lookup, "STORE_BREAKER_FAILURE_THRESHOLD")? {
        config.circuit_breaker.failure_threshold = threshold;
    }
    if let Some(secs) = parse_var::<u64, _>(&lookup, "STORE_BREAKER_RECOVERY_SECS")? {
        config.circuit_breaker.recovery_timeout = Duration::from_secs(secs);
    }

    Ok((url, config))
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| StoreError::Config(format!("{}={:?}: {}", name, raw, e))),
        None => Ok(None),
    }
}

// Helper module to serialize/deserialize Duration with serde
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

mod option_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.key_prefix, "ratelimit");
        assert_eq!(config.fallback.max_entries, 500);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.circuit_breaker.recovery_timeout, Duration::from_secs(30));
        assert_eq!(config.health.cache_ttl, Duration::from_secs(5));

        let parsed = ClientConfig::from_json_str("{}").unwrap();
        assert_eq!(parsed.key_prefix, "ratelimit");
        assert_eq!(parsed.fallback.cleanup_interval, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_partial_json_overrides() {
        let json = r#"{
            "key_prefix": "vessels",
            "fallback": { "max_entries": 50, "cleanup_interval": null },
            "circuit_breaker": { "failure_threshold": 3, "recovery_timeout": 1500 }
        }"#;

        let config = ClientConfig::from_json_str(json).unwrap();
        assert_eq!(config.key_prefix, "vessels");
        assert_eq!(config.fallback.max_entries, 50);
        assert_eq!(config.fallback.default_ttl, Duration::from_secs(300));
        assert_eq!(config.fallback.cleanup_interval, None);
        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert_eq!(
            config.circuit_breaker.recovery_timeout,
            Duration::from_millis(1500)
        );
    }

    #[test]
    fn test_malformed_json_is_config_error() {
        let result = ClientConfig::from_json_str("{ not json");
        assert!(matches!(result, Err(StoreError::Config(_))));
    }

    #[test]
    fn test_env_lookup() {
        let vars: HashMap<&str, &str> = [
            ("REDIS_URL", "redis://cache.internal:6379/2"),
            ("STORE_FALLBACK_MAX_ENTRIES", "64"),
            ("STORE_BREAKER_FAILURE_THRESHOLD", "3"),
            ("STORE_BREAKER_RECOVERY_SECS", "45"),
        ]
        .into_iter()
        .collect();

        let (url, config) = from_lookup(|name| vars.get(name).map(|v| v.to_string())).unwrap();
        assert_eq!(url.as_deref(), Some("redis://cache.internal:6379/2"));
        assert_eq!(config.fallback.max_entries, 64);
        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.circuit_breaker.recovery_timeout, Duration::from_secs(45));
    }

    #[test]
    fn test_env_empty_url_means_fallback_only() {
        let (url, _) = from_lookup(|name| (name == "REDIS_URL").then(|| "  ".to_string())).unwrap();
        assert!(url.is_none());
    }

    #[test]
    fn test_env_invalid_number() {
        let result = from_lookup(|name| {
            (name == "STORE_FALLBACK_MAX_ENTRIES").then(|| "lots".to_string())
        });
        match result {
            Err(StoreError::Config(msg)) => assert!(msg.contains("STORE_FALLBACK_MAX_ENTRIES")),
            other => panic!("expected config error, got {:?}", other),
        }
    }
}
