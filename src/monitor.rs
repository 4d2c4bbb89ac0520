use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task;
use tokio::time;
use tracing::{debug, info, warn};

use crate::client::ResilientStoreClient;
use crate::metrics::{Alert, AlertSeverity, AlertThresholds, ComprehensiveMetrics};
use crate::resilience::HealthReport;

/// One pass of the scraper
#[derive(Debug, Clone, Serialize)]
pub struct Scrape {
    pub health: HealthReport,
    pub metrics: ComprehensiveMetrics,
    pub alerts: Vec<Alert>,
}

/// Periodically collects health and metrics from a client and evaluates alerts.
///
/// The client itself never raises alerts; this is the collaborator that does.
pub struct MetricsScraper;

impl MetricsScraper {
    /// Start scraping `client` every `interval`
    pub fn spawn(
        client: Arc<ResilientStoreClient>,
        interval: Duration,
        thresholds: AlertThresholds,
    ) -> ScraperHandle {
        let latest = Arc::new(Mutex::new(None));
        let scrapes = Arc::new(AtomicU64::new(0));
        let cancel_flag = Arc::new(AtomicBool::new(false));

        let task = {
            let latest = Arc::clone(&latest);
            let scrapes = Arc::clone(&scrapes);
            let cancel_flag = Arc::clone(&cancel_flag);

            task::spawn(async move {
                let mut timer = time::interval(interval.max(Duration::from_millis(1)));
                let mut was_healthy = true;

                loop {
                    timer.tick().await;

                    if cancel_flag.load(Ordering::SeqCst) {
                        break;
                    }

                    let health = client.health_check().await;
                    let metrics = client.get_comprehensive_metrics();
                    let alerts = thresholds.evaluate(&metrics);

                    info!(
                        redis_available = health.redis_available,
                        circuit = %health.circuit_breaker_state,
                        fallback_active = health.fallback_active,
                        total_requests = metrics.metrics.total_requests,
                        failure_rate_percent = metrics.metrics.failure_rate_percent,
                        avg_response_ms = metrics.metrics.avg_response_time_ms,
                        fallback_dependency_percent = metrics.fallback_dependency_percent,
                        alerts = alerts.len(),
                        "Store metrics scraped"
                    );

                    for alert in &alerts {
                        match alert.severity {
                            AlertSeverity::Critical => warn!(
                                severity = "critical",
                                metric = alert.metric,
                                value = alert.value,
                                threshold = alert.threshold,
                                "{}",
                                alert.message
                            ),
                            AlertSeverity::Warning => warn!(
                                metric = alert.metric,
                                value = alert.value,
                                threshold = alert.threshold,
                                "{}",
                                alert.message
                            ),
                        }
                    }

                    if health.redis_available != was_healthy {
                        if health.redis_available {
                            info!("Redis is now healthy");
                        } else {
                            warn!("Redis is now unhealthy");
                        }
                        was_healthy = health.redis_available;
                    }

                    *latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(Scrape {
                        health,
                        metrics,
                        alerts,
                    });
                    scrapes.fetch_add(1, Ordering::SeqCst);
                }

                debug!("Metrics scraper stopped");
            })
        };

        ScraperHandle {
            latest,
            scrapes,
            cancel_flag,
            task,
        }
    }
}

/// Handle to a running scraper. Dropping it stops the task.
#[derive(Debug)]
pub struct ScraperHandle {
    latest: Arc<Mutex<Option<Scrape>>>,
    scrapes: Arc<AtomicU64>,
    cancel_flag: Arc<AtomicBool>,
    task: task::JoinHandle<()>,
}

impl ScraperHandle {
    /// Most recent scrape, if one has completed
    pub fn latest(&self) -> Option<Scrape> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn scrape_count(&self) -> u64 {
        self.scrapes.load(Ordering::SeqCst)
    }

    /// Stop the scraper and wait for the task to exit
    pub async fn stop(mut self) {
        self.cancel_flag.store(true, Ordering::SeqCst);
        self.task.abort();
        let _ = (&mut self.task).await;
    }
}

impl Drop for ScraperHandle {
    fn drop(&mut self) {
        self.cancel_flag.store(true, Ordering::SeqCst);
        self.task.abort();
    }
}
