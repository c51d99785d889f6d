//! Circuit Breaker
//!
//! Sheds load from a failing dependency. Three states:
//! Closed (normal operation), Open (fail fast) and HalfOpen (trial call).
//!
//! State, counters and the open timestamp live behind one mutex so every
//! transition is observed atomically by concurrent callers. The lock is
//! never held across the wrapped call.

use std::future::Future;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::resilience::error::UpstreamError;

// == Circuit State ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// All calls pass through
    Closed,
    /// Calls are rejected until the reset timeout elapses
    Open,
    /// One trial call at a time decides whether to close again
    HalfOpen,
}

// == Config ==
/// Thresholds for a single breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in Closed that open the circuit
    pub failure_threshold: u32,
    /// Cool-down before an Open circuit admits a trial call
    pub reset_timeout: Duration,
    /// Consecutive trial successes needed to close again
    pub half_open_success_threshold: u32,
}

impl CircuitBreakerConfig {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            reset_timeout,
            half_open_success_threshold: 1,
        }
    }

    pub fn with_half_open_success_threshold(mut self, threshold: u32) -> Self {
        self.half_open_success_threshold = threshold;
        self
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(30))
    }
}

// == Snapshot ==
/// Point-in-time view of a breaker, for operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
    /// Milliseconds since the circuit last opened, while it is Open or HalfOpen
    pub open_for_ms: Option<u64>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
    /// Bumped on every state change and every trial admission. Outcomes of
    /// calls admitted under an older epoch are ignored.
    epoch: u64,
}

impl BreakerInner {
    fn closed(epoch: u64) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            opened_at: None,
            trial_in_flight: false,
            epoch,
        }
    }

    fn next_epoch(&mut self) -> u64 {
        self.epoch = self.epoch.wrapping_add(1);
        self.epoch
    }
}

/// Outcome of asking the breaker for permission, with the admitting epoch.
enum Admission {
    Rejected,
    Normal(u64),
    Trial(u64),
}

// == Circuit Breaker ==
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        debug!(
            breaker = %name,
            failure_threshold = config.failure_threshold,
            reset_timeout_ms = config.reset_timeout.as_millis() as u64,
            half_open_success_threshold = config.half_open_success_threshold,
            "Circuit breaker created"
        );

        Self {
            name,
            config,
            inner: Mutex::new(BreakerInner::closed(0)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state. An Open circuit whose cool-down has elapsed still reads
    /// as Open until the next call moves it to HalfOpen.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    // == Execute ==
    /// Runs `operation` under breaker protection.
    ///
    /// While Open and inside the cool-down window the operation is never
    /// invoked and a circuit-open [`UpstreamError`] is returned. Otherwise
    /// the operation's own error is returned, converted into [`UpstreamError`].
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, UpstreamError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<UpstreamError>,
    {
        let (epoch, trial) = match self.admit() {
            Admission::Rejected => {
                debug!(breaker = %self.name, "Call rejected, circuit open");
                return Err(UpstreamError::circuit_open(&self.name));
            }
            Admission::Normal(epoch) => (epoch, None),
            Admission::Trial(epoch) => (epoch, Some(TrialSlot { breaker: self, epoch })),
        };

        let result = operation().await;

        // Outcome is recorded below; a cancelled trial releases the slot on drop.
        if let Some(slot) = trial {
            std::mem::forget(slot);
        }

        match result {
            Ok(value) => {
                self.record_success(epoch);
                Ok(value)
            }
            Err(err) => {
                let err = err.into();
                self.record_failure(epoch, &err);
                Err(err)
            }
        }
    }

    fn admit(&self) -> Admission {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Admission::Normal(inner.epoch),
            CircuitState::Open => {
                let cooled_down = inner
                    .opened_at
                    .map_or(true, |at| at.elapsed() >= self.config.reset_timeout);
                if !cooled_down {
                    return Admission::Rejected;
                }
                inner.state = CircuitState::HalfOpen;
                inner.consecutive_successes = 0;
                inner.trial_in_flight = true;
                info!(breaker = %self.name, "Circuit half-open, admitting trial call");
                Admission::Trial(inner.next_epoch())
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    Admission::Rejected
                } else {
                    inner.trial_in_flight = true;
                    Admission::Trial(inner.next_epoch())
                }
            }
        }
    }

    fn record_success(&self, epoch: u64) {
        let mut inner = self.inner.lock();
        if epoch != inner.epoch {
            debug!(breaker = %self.name, "Ignoring success of a call admitted before the last state change");
            return;
        }
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.trial_in_flight = false;
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.half_open_success_threshold {
                    let epoch = inner.epoch.wrapping_add(1);
                    *inner = BreakerInner::closed(epoch);
                    info!(breaker = %self.name, "Circuit closed, dependency recovered");
                } else {
                    debug!(
                        breaker = %self.name,
                        successes = inner.consecutive_successes,
                        needed = self.config.half_open_success_threshold,
                        "Trial call succeeded"
                    );
                }
            }
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self, epoch: u64, error: &UpstreamError) {
        let mut inner = self.inner.lock();
        if epoch != inner.epoch {
            debug!(breaker = %self.name, error = %error, "Ignoring failure of a call admitted before the last state change");
            return;
        }
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    Self::trip(&mut inner);
                    warn!(
                        breaker = %self.name,
                        consecutive_failures = inner.consecutive_failures,
                        reset_timeout_ms = self.config.reset_timeout.as_millis() as u64,
                        error = %error,
                        "Circuit opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                Self::trip(&mut inner);
                warn!(breaker = %self.name, error = %error, "Trial call failed, circuit reopened");
            }
            CircuitState::Open => {}
        }
    }

    fn trip(inner: &mut BreakerInner) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        inner.consecutive_successes = 0;
        inner.trial_in_flight = false;
        inner.next_epoch();
    }

    fn release_trial(&self, epoch: u64) {
        let mut inner = self.inner.lock();
        if inner.epoch == epoch {
            inner.trial_in_flight = false;
        }
    }

    // == Reset ==
    /// Forces the circuit Closed and zeroes every counter.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        let epoch = inner.epoch.wrapping_add(1);
        *inner = BreakerInner::closed(epoch);
        drop(inner);
        info!(breaker = %self.name, "Circuit reset by operator");
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            failure_threshold: self.config.failure_threshold,
            reset_timeout_ms: self.config.reset_timeout.as_millis() as u64,
            open_for_ms: inner.opened_at.map(|at| at.elapsed().as_millis() as u64),
        }
    }
}

/// Holds the HalfOpen trial slot while the trial call is in flight.
struct TrialSlot<'a> {
    breaker: &'a CircuitBreaker,
    epoch: u64,
}

impl Drop for TrialSlot<'_> {
    fn drop(&mut self) {
        self.breaker.release_trial(self.epoch);
    }
}
