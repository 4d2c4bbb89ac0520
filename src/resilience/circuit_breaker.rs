use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::CircuitBreakerConfig;
use crate::error::{Result, StoreError};

/// The state of the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally
    Closed,
    /// Circuit is open, requests fail immediately without reaching Redis
    Open,
    /// Recovery timeout elapsed, a single trial request is let through
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Observable breaker state
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub total_opens: u64,
    pub failure_threshold: u32,
    pub recovery_timeout_ms: u64,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_at: Option<DateTime<Utc>>,
    // Set exactly when state == Open
    opened_at: Option<(Instant, DateTime<Utc>)>,
    trial_in_flight: bool,
    total_opens: u64,
    // Bumped on every state transition; outcomes admitted under an older
    // generation no longer describe the current state
    generation: u64,
}

impl BreakerState {
    fn transition(&mut self, state: CircuitState) {
        self.state = state;
        self.generation = self.generation.wrapping_add(1);
    }

    fn open(&mut self) {
        self.transition(CircuitState::Open);
        self.opened_at = Some((Instant::now(), Utc::now()));
        self.trial_in_flight = false;
        self.total_opens += 1;
    }

    fn close(&mut self) {
        self.transition(CircuitState::Closed);
        self.consecutive_failures = 0;
        self.opened_at = None;
        self.trial_in_flight = false;
    }
}

enum Admission {
    Pass(u64),
    Trial(u64),
    Reject(Duration),
}

/// Circuit breaker guarding one remote dependency
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    inner: Mutex<BreakerState>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure_at: None,
                opened_at: None,
                trial_in_flight: false,
                total_opens: 0,
                generation: 0,
            }),
            config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn threshold(&self) -> u32 {
        self.config.failure_threshold.max(1)
    }

    fn admit(&self) -> Admission {
        let mut inner = self.lock();

        match inner.state {
            CircuitState::Closed => Admission::Pass(inner.generation),
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|(at, _)| at.elapsed())
                    .unwrap_or(self.config.recovery_timeout);

                if elapsed >= self.config.recovery_timeout {
                    inner.transition(CircuitState::HalfOpen);
                    inner.opened_at = None;
                    inner.trial_in_flight = true;
                    info!(breaker = %self.name, "Circuit breaker half-open, sending trial request");
                    Admission::Trial(inner.generation)
                } else {
                    Admission::Reject(self.config.recovery_timeout - elapsed)
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    Admission::Reject(Duration::ZERO)
                } else {
                    inner.trial_in_flight = true;
                    Admission::Trial(inner.generation)
                }
            }
        }
    }

    /// Run `operation` under the breaker.
    ///
    /// While open, fails with [`StoreError::CircuitOpen`] without invoking
    /// `operation`. Only connectivity errors count as failures; any other
    /// outcome proves the dependency answered. An outcome is ignored if the
    /// breaker changed state while the call was in flight, so only the
    /// half-open trial decides whether the circuit closes.
    pub async fn call<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let (trial, generation) = match self.admit() {
            Admission::Reject(retry_after) => {
                return Err(StoreError::CircuitOpen { retry_after });
            }
            Admission::Pass(generation) => (false, generation),
            Admission::Trial(generation) => (true, generation),
        };

        // Frees the half-open slot if this future is dropped mid-trial
        let mut guard = TrialGuard {
            breaker: self,
            generation,
            armed: trial,
        };

        let result = operation().await;
        guard.armed = false;

        match &result {
            Err(e) if e.is_connectivity() => self.on_failure(Some(generation)),
            _ => self.on_success(Some(generation)),
        }

        result
    }

    /// Check whether a request may proceed.
    ///
    /// A `true` answer in the half-open state claims the single trial slot;
    /// the caller must report the outcome with [`record_success`](Self::record_success)
    /// or [`record_failure`](Self::record_failure).
    pub fn allow_request(&self) -> bool {
        !matches!(self.admit(), Admission::Reject(_))
    }

    /// Record a successful operation
    pub fn record_success(&self) {
        self.on_success(None);
    }

    /// Record a connectivity failure
    pub fn record_failure(&self) {
        self.on_failure(None);
    }

    // `admitted` is the generation the call was admitted under, if known
    fn is_stale(&self, inner: &BreakerState, admitted: Option<u64>) -> bool {
        match admitted {
            Some(generation) if generation != inner.generation => {
                debug!(
                    breaker = %self.name,
                    state = %inner.state,
                    "Ignoring outcome of a call admitted before the last state change"
                );
                true
            }
            _ => false,
        }
    }

    fn on_success(&self, admitted: Option<u64>) {
        let mut inner = self.lock();
        if self.is_stale(&inner, admitted) {
            return;
        }

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.close();
                info!(breaker = %self.name, "Circuit breaker closed after successful trial");
            }
            CircuitState::Open => {
                // A call admitted before the circuit opened
                debug!(breaker = %self.name, "Ignoring late success while open");
            }
        }
    }

    fn on_failure(&self, admitted: Option<u64>) {
        let threshold = self.threshold();
        let mut inner = self.lock();
        if self.is_stale(&inner, admitted) {
            return;
        }

        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.last_failure_at = Some(Utc::now());

        match inner.state {
            CircuitState::Closed => {
                if inner.consecutive_failures >= threshold {
                    inner.open();
                    warn!(
                        breaker = %self.name,
                        consecutive_failures = inner.consecutive_failures,
                        recovery_timeout_ms = self.config.recovery_timeout.as_millis() as u64,
                        "Circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.open();
                warn!(breaker = %self.name, "Circuit breaker re-opened after failed trial");
            }
            CircuitState::Open => {}
        }
    }

    /// Administrative override back to closed, e.g. after manual remediation
    pub fn force_close(&self, reason: &str) {
        let mut inner = self.lock();
        let previous = inner.state;
        inner.close();
        info!(breaker = %self.name, from = %previous, reason, "Circuit breaker force-closed");
    }

    /// Get the current state of the circuit breaker
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.lock();
        CircuitBreakerStats {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            last_failure_at: inner.last_failure_at,
            opened_at: inner.opened_at.map(|(_, wall)| wall),
            total_opens: inner.total_opens,
            failure_threshold: self.threshold(),
            recovery_timeout_ms: self.config.recovery_timeout.as_millis() as u64,
        }
    }

    fn release_trial(&self, generation: u64) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen && inner.generation == generation {
            inner.trial_in_flight = false;
        }
    }
}

struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.release_trial(self.generation);
        }
    }
}
