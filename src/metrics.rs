//! Counters and derived ratios for the store client.
//!
//! One [`MetricsRegistry`] lives per client. It is shared read-only (behind an
//! `Arc`) with monitoring collaborators and reset only by an explicit admin
//! action.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::error::StoreError;
use crate::resilience::{CircuitBreakerStats, CircuitState};
use crate::storage::FallbackStats;

// Number of recent samples in the rolling latency average
const LATENCY_WINDOW: usize = 100;

/// Human-readable response-time bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseCategory {
    Excellent,
    Good,
    Acceptable,
    Slow,
    Critical,
}

impl ResponseCategory {
    pub fn from_millis(ms: f64) -> Self {
        if ms < 10.0 {
            ResponseCategory::Excellent
        } else if ms < 50.0 {
            ResponseCategory::Good
        } else if ms < 200.0 {
            ResponseCategory::Acceptable
        } else if ms < 1000.0 {
            ResponseCategory::Slow
        } else {
            ResponseCategory::Critical
        }
    }
}

impl fmt::Display for ResponseCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ResponseCategory::Excellent => "excellent",
            ResponseCategory::Good => "good",
            ResponseCategory::Acceptable => "acceptable",
            ResponseCategory::Slow => "slow",
            ResponseCategory::Critical => "critical",
        };
        f.write_str(label)
    }
}

/// Per-operation counters
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct OperationStats {
    pub requests: u64,
    pub redis_hits: u64,
    pub fallback_hits: u64,
    pub failures: u64,
}

/// Snapshot of the registry's counters
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub redis_hits: u64,
    pub fallback_hits: u64,
    pub failures: u64,
    pub circuit_open_rejections: u64,
    pub fallback_errors: u64,
    /// failures / total_requests, as a percentage
    pub failure_rate_percent: f64,
    pub avg_response_time_ms: f64,
    pub response_category: ResponseCategory,
    pub uptime_secs: u64,
    pub operations: BTreeMap<String, OperationStats>,
}

#[derive(Debug, Default)]
struct RollingState {
    latencies_ms: VecDeque<f64>,
    operations: BTreeMap<&'static str, OperationStats>,
}

/// Thread-safe metrics accumulator
#[derive(Debug)]
pub struct MetricsRegistry {
    total_requests: AtomicU64,
    redis_hits: AtomicU64,
    fallback_hits: AtomicU64,
    failures: AtomicU64,
    circuit_open_rejections: AtomicU64,
    fallback_errors: AtomicU64,
    rolling: Mutex<RollingState>,
    started_at: Instant,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            redis_hits: AtomicU64::new(0),
            fallback_hits: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            circuit_open_rejections: AtomicU64::new(0),
            fallback_errors: AtomicU64::new(0),
            rolling: Mutex::new(RollingState::default()),
            started_at: Instant::now(),
        }
    }

    fn rolling(&self) -> MutexGuard<'_, RollingState> {
        self.rolling.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_operation<F>(&self, operation: &'static str, update: F)
    where
        F: FnOnce(&mut OperationStats),
    {
        update(self.rolling().operations.entry(operation).or_default());
    }

    fn record_latency(&self, elapsed: Duration) {
        let mut rolling = self.rolling();
        if rolling.latencies_ms.len() == LATENCY_WINDOW {
            rolling.latencies_ms.pop_front();
        }
        rolling.latencies_ms.push_back(elapsed.as_secs_f64() * 1000.0);
    }

    pub fn record_request(&self, operation: &'static str) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.with_operation(operation, |op| op.requests += 1);
    }

    pub fn record_redis_hit(&self, operation: &'static str, elapsed: Duration) {
        self.redis_hits.fetch_add(1, Ordering::Relaxed);
        self.with_operation(operation, |op| op.redis_hits += 1);
        self.record_latency(elapsed);
    }

    /// Record a remote failure (including a circuit-open rejection)
    pub fn record_failure(&self, operation: &'static str, error: &StoreError) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        if matches!(error, StoreError::CircuitOpen { .. }) {
            self.circuit_open_rejections.fetch_add(1, Ordering::Relaxed);
        }
        self.with_operation(operation, |op| op.failures += 1);
    }

    pub fn record_fallback_hit(&self, operation: &'static str, elapsed: Duration) {
        self.fallback_hits.fetch_add(1, Ordering::Relaxed);
        self.with_operation(operation, |op| op.fallback_hits += 1);
        self.record_latency(elapsed);
    }

    pub fn record_fallback_error(&self, _operation: &'static str) {
        self.fallback_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let failures = self.failures.load(Ordering::Relaxed);

        let rolling = self.rolling();
        let avg_response_time_ms = if rolling.latencies_ms.is_empty() {
            0.0
        } else {
            rolling.latencies_ms.iter().sum::<f64>() / rolling.latencies_ms.len() as f64
        };
        let operations = rolling
            .operations
            .iter()
            .map(|(name, stats)| (name.to_string(), stats.clone()))
            .collect();
        drop(rolling);

        MetricsSnapshot {
            total_requests,
            redis_hits: self.redis_hits.load(Ordering::Relaxed),
            fallback_hits: self.fallback_hits.load(Ordering::Relaxed),
            failures,
            circuit_open_rejections: self.circuit_open_rejections.load(Ordering::Relaxed),
            fallback_errors: self.fallback_errors.load(Ordering::Relaxed),
            failure_rate_percent: percent(failures, total_requests),
            avg_response_time_ms,
            response_category: ResponseCategory::from_millis(avg_response_time_ms),
            uptime_secs: self.started_at.elapsed().as_secs(),
            operations,
        }
    }

    /// Admin action: zero every counter
    pub fn reset(&self) {
        for counter in [
            &self.total_requests,
            &self.redis_hits,
            &self.fallback_hits,
            &self.failures,
            &self.circuit_open_rejections,
            &self.fallback_errors,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        *self.rolling() = RollingState::default();
    }
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

/// Everything a dashboard needs in one snapshot
#[derive(Debug, Clone, Serialize)]
pub struct ComprehensiveMetrics {
    pub client_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub redis_configured: bool,
    pub redis_connected: bool,
    pub metrics: MetricsSnapshot,
    pub circuit_breaker: CircuitBreakerStats,
    pub fallback: FallbackStats,
    /// 100 - failure rate
    pub availability_percent: f64,
    /// Share of requests answered by the fallback cache
    pub fallback_dependency_percent: f64,
}

impl ComprehensiveMetrics {
    pub fn new(
        client_id: Uuid,
        redis_configured: bool,
        redis_connected: bool,
        metrics: MetricsSnapshot,
        circuit_breaker: CircuitBreakerStats,
        fallback: FallbackStats,
    ) -> Self {
        let availability_percent = 100.0 - metrics.failure_rate_percent;
        let fallback_dependency_percent = percent(metrics.fallback_hits, metrics.total_requests);

        Self {
            client_id,
            generated_at: Utc::now(),
            redis_configured,
            redis_connected,
            metrics,
            circuit_breaker,
            fallback,
            availability_percent,
            fallback_dependency_percent,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

/// A threshold breach found in a metrics snapshot
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub severity: AlertSeverity,
    pub metric: &'static str,
    pub value: f64,
    pub threshold: f64,
    pub message: String,
}

/// Limits used to turn a snapshot into alerts.
///
/// The client never raises alerts itself; a monitoring collaborator
/// evaluates these against scraped metrics.
#[derive(Debug, Clone, Serialize)]
pub struct AlertThresholds {
    pub max_failure_rate_percent: f64,
    pub max_avg_response_ms: f64,
    pub max_fallback_dependency_percent: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            max_failure_rate_percent: 10.0,
            max_avg_response_ms: 500.0,
            max_fallback_dependency_percent: 50.0,
        }
    }
}

impl AlertThresholds {
    pub fn evaluate(&self, snapshot: &ComprehensiveMetrics) -> Vec<Alert> {
        let mut alerts = Vec::new();

        match snapshot.circuit_breaker.state {
            CircuitState::Open => alerts.push(Alert {
                severity: AlertSeverity::Critical,
                metric: "circuit_breaker_state",
                value: snapshot.circuit_breaker.consecutive_failures as f64,
                threshold: snapshot.circuit_breaker.failure_threshold as f64,
                message: "Redis circuit breaker is open, all traffic is on the fallback cache"
                    .to_string(),
            }),
            CircuitState::HalfOpen => alerts.push(Alert {
                severity: AlertSeverity::Warning,
                metric: "circuit_breaker_state",
                value: snapshot.circuit_breaker.consecutive_failures as f64,
                threshold: snapshot.circuit_breaker.failure_threshold as f64,
                message: "Redis circuit breaker is probing for recovery".to_string(),
            }),
            CircuitState::Closed => {}
        }

        // Rates are meaningless before any traffic
        if snapshot.metrics.total_requests == 0 {
            return alerts;
        }

        let failure_rate = snapshot.metrics.failure_rate_percent;
        if failure_rate > self.max_failure_rate_percent {
            let severity = if failure_rate > self.max_failure_rate_percent * 2.0 {
                AlertSeverity::Critical
            } else {
                AlertSeverity::Warning
            };
            alerts.push(Alert {
                severity,
                metric: "failure_rate_percent",
                value: failure_rate,
                threshold: self.max_failure_rate_percent,
                message: format!("Redis failure rate at {:.1}%", failure_rate),
            });
        }

        let avg_ms = snapshot.metrics.avg_response_time_ms;
        if avg_ms > self.max_avg_response_ms {
            alerts.push(Alert {
                severity: AlertSeverity::Warning,
                metric: "avg_response_time_ms",
                value: avg_ms,
                threshold: self.max_avg_response_ms,
                message: format!(
                    "Average response time {:.1}ms ({})",
                    avg_ms, snapshot.metrics.response_category
                ),
            });
        }

        let dependency = snapshot.fallback_dependency_percent;
        if dependency > self.max_fallback_dependency_percent {
            alerts.push(Alert {
                severity: AlertSeverity::Warning,
                metric: "fallback_dependency_percent",
                value: dependency,
                threshold: self.max_fallback_dependency_percent,
                message: format!("{:.1}% of requests served by the fallback cache", dependency),
            });
        }

        alerts
    }
}
