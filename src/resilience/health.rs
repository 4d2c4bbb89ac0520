use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time;
use tracing::{debug, warn};

use crate::config::HealthConfig;
use crate::metrics::ResponseCategory;
use crate::resilience::CircuitState;
use crate::storage::RemoteStore;

/// Result of a health check as reported to dashboards
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub redis_available: bool,
    /// Round-trip time of the liveness probe, when it succeeded
    pub response_time_ms: Option<f64>,
    pub response_category: Option<ResponseCategory>,
    pub circuit_breaker_state: CircuitState,
    /// True when operations are (or would be) served by the fallback cache
    pub fallback_active: bool,
    pub fallback_entries: usize,
    pub checked_at: DateTime<Utc>,
}

/// Outcome of a single liveness probe
#[derive(Debug, Clone, Copy)]
pub struct ProbeOutcome {
    pub available: bool,
    pub elapsed: Duration,
}

impl ProbeOutcome {
    pub fn response_time_ms(&self) -> Option<f64> {
        self.available.then(|| self.elapsed.as_secs_f64() * 1000.0)
    }
}

/// PING the remote store, bounded by `timeout`. Never fails.
pub async fn probe(remote: &dyn RemoteStore, timeout: Duration) -> ProbeOutcome {
    let started = Instant::now();

    let available = match time::timeout(timeout, remote.ping()).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!(error_class = e.error_class(), error = %e, "Redis liveness probe failed");
            false
        }
        Err(_) => {
            warn!("Redis liveness probe timed out after {:?}", timeout);
            false
        }
    };

    ProbeOutcome {
        available,
        elapsed: started.elapsed(),
    }
}

#[derive(Debug)]
struct CachedReport {
    report: HealthReport,
    taken_at: Instant,
}

/// Throttles health checks.
///
/// The cached report is served for `cache_ttl`; the async mutex is held across
/// the probe so concurrent callers wait for the one in flight instead of
/// issuing their own.
#[derive(Debug)]
pub struct HealthMonitor {
    config: HealthConfig,
    cached: Mutex<Option<CachedReport>>,
    probes: AtomicU64,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            cached: Mutex::new(None),
            probes: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Return the cached report, or run `check` if it is missing or stale
    pub async fn report<F, Fut>(&self, check: F) -> HealthReport
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = HealthReport>,
    {
        let mut cached = self.cached.lock().await;

        if let Some(entry) = cached.as_ref() {
            if entry.taken_at.elapsed() < self.config.cache_ttl {
                debug!("Serving cached health report");
                return entry.report.clone();
            }
        }

        let report = check().await;
        self.probes.fetch_add(1, Ordering::Relaxed);

        *cached = Some(CachedReport {
            report: report.clone(),
            taken_at: Instant::now(),
        });
        report
    }

    /// Drop the cached report so the next call probes again
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }

    /// Number of health checks actually executed
    pub fn probe_count(&self) -> u64 {
        self.probes.load(Ordering::Relaxed)
    }
}
