// library entry
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod monitor;
pub mod rate_limit;
pub mod resilience;
pub mod storage;

#[cfg(test)]
mod test_utils;
#[cfg(test)]
mod tests;

// Re-export key components for convenience
pub use client::ResilientStoreClient;
pub use config::ClientConfig;
pub use error::{Result, StoreError};
pub use logging::init as init_logging;
pub use metrics::{AlertThresholds, ComprehensiveMetrics, ResponseCategory};
pub use monitor::{MetricsScraper, ScraperHandle};
pub use rate_limit::{RateLimitStatus, RateWindow};
pub use resilience::{CircuitState, HealthReport};
