//! Circuit breaker guarding one external dependency.
//!
//! # States
//!
//! - **Closed**: calls pass through; failures inside `monitoring_period` are
//!   counted and reaching `failure_threshold` opens the circuit.
//! - **Open**: calls are rejected without running the work until
//!   `recovery_timeout` has passed since the last failure.
//! - **HalfOpen**: exactly one trial call runs. Success closes the circuit,
//!   failure reopens it and restarts the recovery timer.
//!
//! One breaker is shared by every run that talks to the same dependency.

use serde::Deserialize;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures inside the window that open the circuit
    pub failure_threshold: u32,
    /// Time spent open before a trial call is allowed
    #[serde(with = "crate::settings::duration_ms")]
    pub recovery_timeout: Duration,
    /// How far back failures count toward the threshold
    #[serde(with = "crate::settings::duration_ms")]
    pub monitoring_period: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            monitoring_period: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, the work was not run
    #[error("circuit breaker {name} is open")]
    Open { name: String },

    /// A half-open trial is already in flight
    #[error("circuit breaker {name} rejected the call while probing")]
    Rejected { name: String },

    #[error("{0}")]
    ExecutionFailed(E),
}

impl<E> CircuitBreakerError<E> {
    /// True when the work never ran.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, CircuitBreakerError::ExecutionFailed(_))
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            CircuitBreakerError::ExecutionFailed(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct CircuitBreakerMetrics {
    failures: AtomicU64,
    successes: AtomicU64,
    opened_count: AtomicU64,
    closed_count: AtomicU64,
    rejected_count: AtomicU64,
}

impl CircuitBreakerMetrics {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub failure_count: u32,
    pub failures: u64,
    pub successes: u64,
    pub opened_count: u64,
    pub closed_count: u64,
    pub rejected_count: u64,
}

struct BreakerState {
    state: CircuitState,
    failures: VecDeque<Instant>,
    last_failure_time: Option<Instant>,
    trial_in_flight: bool,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: VecDeque::new(),
            last_failure_time: None,
            trial_in_flight: false,
        }
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(oldest) = self.failures.front() {
            if now.saturating_duration_since(*oldest) > window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Trial,
}

/// Failure gate for one dependency. Cloning shares the same state.
#[derive(Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    config: CircuitBreakerConfig,
    state: Arc<Mutex<BreakerState>>,
    metrics: Arc<CircuitBreakerMetrics>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name: String = name.into();
        info!(breaker = %name, threshold = config.failure_threshold, "creating circuit breaker");

        Self {
            name: Arc::from(name),
            config,
            state: Arc::new(Mutex::new(BreakerState::new())),
            metrics: Arc::new(CircuitBreakerMetrics::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Failures currently inside the monitoring window.
    pub fn failure_count(&self) -> u32 {
        let mut state = self.lock();
        state.prune(Instant::now(), self.config.monitoring_period);
        state.failures.len() as u32
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        CircuitBreakerStats {
            state: self.state(),
            failure_count: self.failure_count(),
            failures: self.metrics.failures.load(Ordering::Relaxed),
            successes: self.metrics.successes.load(Ordering::Relaxed),
            opened_count: self.metrics.opened_count.load(Ordering::Relaxed),
            closed_count: self.metrics.closed_count.load(Ordering::Relaxed),
            rejected_count: self.metrics.rejected_count.load(Ordering::Relaxed),
        }
    }

    /// Runs `work` unless the circuit rejects it. Errors are recorded, never
    /// retried here.
    pub async fn execute<F, Fut, T, E>(&self, work: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let admission = self.admit()?;
        let mut trial = TrialGuard {
            breaker: self,
            armed: matches!(admission, Admission::Trial),
        };

        let result = work().await;
        trial.armed = false;

        match result {
            Ok(value) => {
                self.on_success(admission);
                Ok(value)
            }
            Err(error) => {
                self.on_failure(admission);
                Err(CircuitBreakerError::ExecutionFailed(error))
            }
        }
    }

    /// Forces the circuit closed and forgets recorded failures.
    pub fn reset(&self) {
        let mut state = self.lock();
        info!(breaker = %self.name, "manually resetting circuit breaker");
        *state = BreakerState::new();
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn admit<E>(&self) -> Result<Admission, CircuitBreakerError<E>> {
        let mut state = self.lock();

        match state.state {
            CircuitState::Closed => Ok(Admission::Normal),
            CircuitState::Open => {
                let recovered = state
                    .last_failure_time
                    .map(|at| at.elapsed() >= self.config.recovery_timeout)
                    .unwrap_or(true);
                if recovered {
                    info!(breaker = %self.name, "circuit half-open, allowing trial call");
                    state.state = CircuitState::HalfOpen;
                    state.trial_in_flight = true;
                    Ok(Admission::Trial)
                } else {
                    CircuitBreakerMetrics::bump(&self.metrics.rejected_count);
                    debug!(breaker = %self.name, "rejecting call, circuit open");
                    Err(CircuitBreakerError::Open {
                        name: self.name.to_string(),
                    })
                }
            }
            CircuitState::HalfOpen => {
                if state.trial_in_flight {
                    CircuitBreakerMetrics::bump(&self.metrics.rejected_count);
                    Err(CircuitBreakerError::Rejected {
                        name: self.name.to_string(),
                    })
                } else {
                    state.trial_in_flight = true;
                    Ok(Admission::Trial)
                }
            }
        }
    }

    // Only the trial call moves the circuit out of HalfOpen. A call admitted
    // while closed that finishes after the circuit opened only counts.
    fn on_success(&self, admission: Admission) {
        let mut state = self.lock();
        CircuitBreakerMetrics::bump(&self.metrics.successes);

        match (state.state, admission) {
            (CircuitState::Closed, _) => state.failures.clear(),
            (CircuitState::HalfOpen, Admission::Trial) => {
                info!(breaker = %self.name, "trial call succeeded, closing circuit");
                *state = BreakerState::new();
                CircuitBreakerMetrics::bump(&self.metrics.closed_count);
            }
            _ => debug!(breaker = %self.name, "late success ignored, circuit not closed"),
        }
    }

    fn on_failure(&self, admission: Admission) {
        let mut state = self.lock();
        CircuitBreakerMetrics::bump(&self.metrics.failures);

        let now = Instant::now();
        match (state.state, admission) {
            (CircuitState::Closed, _) => {
                state.prune(now, self.config.monitoring_period);
                state.failures.push_back(now);
                if state.failures.len() as u32 >= self.config.failure_threshold {
                    warn!(
                        breaker = %self.name,
                        failures = state.failures.len(),
                        "opening circuit"
                    );
                    state.state = CircuitState::Open;
                    state.last_failure_time = Some(now);
                    CircuitBreakerMetrics::bump(&self.metrics.opened_count);
                }
            }
            (CircuitState::HalfOpen, Admission::Trial) => {
                warn!(breaker = %self.name, "trial call failed, reopening circuit");
                state.state = CircuitState::Open;
                state.trial_in_flight = false;
                state.last_failure_time = Some(now);
                CircuitBreakerMetrics::bump(&self.metrics.opened_count);
            }
            _ => debug!(breaker = %self.name, "late failure ignored, circuit not closed"),
        }
    }
}

/// Frees the half-open slot if a trial call is dropped before finishing.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.breaker.lock();
            if state.state == CircuitState::HalfOpen {
                state.trial_in_flight = false;
            }
        }
    }
}
