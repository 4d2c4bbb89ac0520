// src/resilience/mod.rs
//! Resilience features for the store client.
//!
//! 1. **Circuit Breaking** - Stop calling Redis while it is down
//! 2. **Retry with Exponential Backoff** - Re-establish the connection without hammering
//! 3. **Health Checks** - Throttled liveness probing with a cached report

pub mod circuit_breaker;
pub mod exponential_backoff;
pub mod health;

#[cfg(test)]
mod tests;

// Re-export key components
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerStats, CircuitState};
pub use exponential_backoff::{retry, ExponentialBackoff};
pub use health::{probe, HealthMonitor, HealthReport, ProbeOutcome};
