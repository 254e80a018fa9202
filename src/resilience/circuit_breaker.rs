//! Circuit breaker with three states: Closed (normal operation), Open
//! (failing fast), and HalfOpen (probing recovery with a single trial call).

use crate::config::CircuitBreakerConfig;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Circuit breaker states representing the current operational mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation, calls are allowed through.
    Closed,
    /// Failure mode, calls fail fast without executing.
    Open,
    /// Probing recovery, exactly one trial call in flight.
    HalfOpen,
}

/// Emitted on every state transition.
#[derive(Debug, Clone)]
pub struct StateChange {
    pub previous: CircuitState,
    pub next: CircuitState,
    pub at: chrono::DateTime<chrono::Utc>,
}

/// Errors that can occur during circuit breaker operation.
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open (or the half-open trial slot is taken); the wrapped
    /// operation was never invoked.
    #[error("circuit breaker is open for {component}")]
    CircuitOpen { component: String },

    /// Operation was invoked and failed; the failure was recorded.
    #[error("operation failed: {0}")]
    OperationFailed(E),
}

/// Call-count snapshot for diagnostics.
#[derive(Debug, Clone, Copy, Default)]
pub struct CircuitBreakerMetrics {
    pub total_calls: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub rejected_count: u64,
    pub consecutive_failures: u32,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
    metrics: CircuitBreakerMetrics,
}

enum Admission {
    /// Invoke normally under the Closed state.
    Normal,
    /// Invoke as the single half-open trial.
    Trial,
    /// Fail fast without invoking.
    Reject,
}

/// Circuit breaker with atomic state management.
///
/// All state transitions happen under one mutex, so no two concurrent
/// callers can both claim the half-open trial slot and no transition can be
/// observed half-applied.
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Component name for logging and notifications.
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
    transitions: broadcast::Sender<StateChange>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        info!(
            component = %name,
            failure_threshold = config.failure_threshold,
            reset_timeout_seconds = config.reset_timeout_seconds,
            "circuit breaker initialized"
        );

        let (transitions, _) = broadcast::channel(64);
        Self {
            name,
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                opened_at: None,
                trial_in_flight: false,
                metrics: CircuitBreakerMetrics::default(),
            }),
            transitions,
        }
    }

    /// Current circuit state.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Component name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscribe to state-change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.transitions.subscribe()
    }

    /// Current metrics snapshot.
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        self.inner.lock().metrics
    }

    /// Execute an operation with circuit breaker protection.
    ///
    /// While open, calls fail fast with [`CircuitBreakerError::CircuitOpen`]
    /// until the reset timeout elapses; the first caller after that runs the
    /// single half-open trial, and any concurrent caller arriving before the
    /// trial resolves is rejected the same way.
    pub async fn call<F, T, E, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let admission = self.admit();
        let is_trial = match admission {
            Admission::Reject => {
                debug!(component = %self.name, "call rejected, circuit open");
                return Err(CircuitBreakerError::CircuitOpen {
                    component: self.name.clone(),
                });
            }
            Admission::Trial => true,
            Admission::Normal => false,
        };

        // If the trial future is dropped mid-operation the guard reopens
        // the circuit with a fresh timer; the slot must never leak.
        let mut trial_guard = is_trial.then(|| TrialGuard {
            breaker: self,
            armed: true,
        });

        let start = Instant::now();
        let result = operation().await;
        let duration = start.elapsed();

        if let Some(guard) = trial_guard.as_mut() {
            guard.armed = false;
        }
        match &result {
            Ok(_) => self.record_success(is_trial, duration),
            Err(_) => self.record_failure(is_trial, duration),
        }

        result.map_err(CircuitBreakerError::OperationFailed)
    }

    /// Decide atomically whether a call may proceed, claiming the half-open
    /// trial slot when the reset timeout has elapsed.
    fn admit(&self) -> Admission {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Admission::Normal,
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.config.reset_timeout() {
                    Self::transition(&self.name, &self.transitions, &mut inner, CircuitState::HalfOpen);
                    inner.trial_in_flight = true;
                    Admission::Trial
                } else {
                    inner.metrics.rejected_count += 1;
                    Admission::Reject
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    inner.metrics.rejected_count += 1;
                    Admission::Reject
                } else {
                    inner.trial_in_flight = true;
                    Admission::Trial
                }
            }
        }
    }

    fn record_success(&self, is_trial: bool, duration: Duration) {
        let mut inner = self.inner.lock();
        inner.metrics.total_calls += 1;
        inner.metrics.success_count += 1;
        inner.metrics.consecutive_failures = 0;

        debug!(
            component = %self.name,
            duration_ms = duration.as_millis() as u64,
            "operation succeeded"
        );

        if is_trial {
            inner.trial_in_flight = false;
            inner.opened_at = None;
            Self::transition(&self.name, &self.transitions, &mut inner, CircuitState::Closed);
        }
    }

    fn record_failure(&self, is_trial: bool, duration: Duration) {
        let mut inner = self.inner.lock();
        inner.metrics.total_calls += 1;
        inner.metrics.failure_count += 1;
        inner.metrics.consecutive_failures += 1;

        error!(
            component = %self.name,
            duration_ms = duration.as_millis() as u64,
            consecutive_failures = inner.metrics.consecutive_failures,
            "operation failed"
        );

        if is_trial {
            // A failed trial reopens the circuit with a fresh timer.
            inner.trial_in_flight = false;
            inner.opened_at = Some(Instant::now());
            Self::transition(&self.name, &self.transitions, &mut inner, CircuitState::Open);
        } else if inner.state == CircuitState::Closed
            && inner.metrics.consecutive_failures >= self.config.failure_threshold
        {
            inner.opened_at = Some(Instant::now());
            Self::transition(&self.name, &self.transitions, &mut inner, CircuitState::Open);
        }
    }

    /// Force the circuit open (emergency isolation).
    pub fn force_open(&self) {
        warn!(component = %self.name, "circuit breaker forced open");
        let mut inner = self.inner.lock();
        inner.opened_at = Some(Instant::now());
        inner.trial_in_flight = false;
        Self::transition(&self.name, &self.transitions, &mut inner, CircuitState::Open);
    }

    /// Force the circuit closed (emergency recovery).
    pub fn force_closed(&self) {
        warn!(component = %self.name, "circuit breaker forced closed");
        let mut inner = self.inner.lock();
        inner.opened_at = None;
        inner.trial_in_flight = false;
        inner.metrics.consecutive_failures = 0;
        Self::transition(&self.name, &self.transitions, &mut inner, CircuitState::Closed);
    }

    fn abandon_trial(&self) {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::HalfOpen {
            return;
        }
        warn!(component = %self.name, "half-open trial abandoned, reopening");
        inner.trial_in_flight = false;
        inner.opened_at = Some(Instant::now());
        Self::transition(&self.name, &self.transitions, &mut inner, CircuitState::Open);
    }

    fn transition(
        name: &str,
        transitions: &broadcast::Sender<StateChange>,
        inner: &mut BreakerState,
        next: CircuitState,
    ) {
        let previous = inner.state;
        if previous == next {
            return;
        }
        inner.state = next;

        info!(
            component = %name,
            previous = ?previous,
            next = ?next,
            "circuit breaker state changed"
        );

        // Nobody listening is fine; notifications are best-effort.
        let _ = transitions.send(StateChange {
            previous,
            next,
            at: chrono::Utc::now(),
        });
    }
}

/// Releases the half-open trial slot if the trial call never resolves.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.abandon_trial();
        }
    }
}
