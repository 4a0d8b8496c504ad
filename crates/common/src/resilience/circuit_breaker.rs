//! Three-state circuit breaker guarding a single dependency.
//!
//! State machine:
//! - **Closed** (initial): calls pass through. A failure bumps the
//!   consecutive-failure counter; reaching `failure_threshold` opens the
//!   circuit. A success resets the counter.
//! - **Open**: calls fail immediately with [`CircuitOpen`] without touching
//!   the dependency. Once `recovery_timeout` has elapsed since opening, the
//!   next call moves the circuit to half-open and goes through as a trial.
//! - **HalfOpen**: calls pass through. `success_threshold` consecutive
//!   successes close the circuit; any failure re-opens it and restarts the
//!   recovery timer.
//!
//! Transitions happen under one mutex, so concurrent callers observe a
//! consistent machine and no state is ever skipped.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::clock::{Clock, SystemClock};
use super::ConfigError;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
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

/// The breaker rejected a call without invoking the wrapped operation.
///
/// Distinct from any operation error so higher layers can branch on it;
/// it also must never consume a retry budget (see `retry`).
#[derive(Debug, Clone, PartialEq, Error)]
#[error("circuit breaker is open ({consecutive_failures} consecutive failures, open for {open_for:?})")]
pub struct CircuitOpen {
    pub consecutive_failures: u32,
    /// Time since the circuit last opened.
    pub open_for: Duration,
}

/// Outcome of a breaker-guarded call.
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// Rejected while open; the operation was never invoked.
    #[error("{0}")]
    Open(CircuitOpen),
    /// The operation ran and failed; counted as a breaker failure.
    #[error("operation failed: {0}")]
    Operation(E),
}

impl<E> From<CircuitOpen> for BreakerError<E> {
    fn from(open: CircuitOpen) -> Self {
        BreakerError::Open(open)
    }
}

/// Configuration for [`CircuitBreaker`].
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// How long to stay open before allowing a trial call.
    pub recovery_timeout: Duration,
    /// Consecutive half-open successes that close the circuit.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 2,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::new("failure_threshold must be at least 1"));
        }
        if self.recovery_timeout.is_zero() {
            return Err(ConfigError::new("recovery_timeout must be greater than zero"));
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::new("success_threshold must be at least 1"));
        }
        Ok(())
    }
}

/// Point-in-time snapshot for external monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub total_calls: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub times_opened: u64,
    pub seconds_in_state: f64,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    last_transition: Instant,
    total_calls: u64,
    total_successes: u64,
    total_failures: u64,
    times_opened: u64,
}

impl BreakerState {
    fn transition(&mut self, to: CircuitState, now: Instant, reason: &str) {
        if self.state == to {
            return;
        }
        let from = self.state;
        self.state = to;
        self.last_transition = now;

        match to {
            CircuitState::Open => {
                self.opened_at = Some(now);
                self.times_opened += 1;
                error!(%from, %to, reason, "circuit breaker opened");
            }
            CircuitState::Closed => info!(%from, %to, reason, "circuit breaker closed"),
            CircuitState::HalfOpen => warn!(%from, %to, reason, "circuit breaker half-open"),
        }
    }
}

/// Fail-fast guard around a single unreliable dependency.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
    clock: Arc<C>,
}

impl CircuitBreaker<SystemClock> {
    /// Create a breaker driven by the system clock.
    pub fn new(config: CircuitBreakerConfig) -> Result<Self, ConfigError> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a breaker with a custom clock (used by tests).
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> Result<Self, ConfigError> {
        config.validate()?;
        let now = clock.now();
        let state = BreakerState {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            opened_at: None,
            last_transition: now,
            total_calls: 0,
            total_successes: 0,
            total_failures: 0,
            times_opened: 0,
        };
        Ok(Self { config, state: Mutex::new(state), clock: Arc::new(clock) })
    }

    /// Execute `op` under breaker protection.
    ///
    /// Invokes `op` only when the circuit is not blocking; otherwise fails
    /// with [`BreakerError::Open`]. Operation errors propagate wrapped in
    /// [`BreakerError::Operation`] and count as a single failure.
    pub async fn call<F, Fut, T, E>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let state_at_call = self.admit()?;

        match op().await {
            Ok(value) => {
                self.record_success(state_at_call);
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(BreakerError::Operation(err))
            }
        }
    }

    /// Check admission, transitioning Open → HalfOpen when the recovery
    /// timeout has elapsed. Returns the state the call executes under.
    fn admit(&self) -> Result<CircuitState, CircuitOpen> {
        let now = self.clock.now();
        let mut state = self.lock_state();
        state.total_calls += 1;

        if state.state == CircuitState::Open {
            let open_for = state
                .opened_at
                .map(|at| now.saturating_duration_since(at))
                .unwrap_or(Duration::ZERO);

            if open_for >= self.config.recovery_timeout {
                state.consecutive_successes = 0;
                state.transition(CircuitState::HalfOpen, now, "recovery timeout elapsed");
            } else {
                debug!(open_for_ms = open_for.as_millis() as u64, "circuit breaker rejecting call");
                return Err(CircuitOpen {
                    consecutive_failures: state.consecutive_failures,
                    open_for,
                });
            }
        }

        Ok(state.state)
    }

    fn record_success(&self, state_at_call: CircuitState) {
        let now = self.clock.now();
        let mut state = self.lock_state();
        state.total_successes += 1;
        state.consecutive_failures = 0;

        if state_at_call == CircuitState::HalfOpen {
            state.consecutive_successes += 1;
            if state.consecutive_successes >= self.config.success_threshold {
                let reason =
                    format!("{} consecutive successes", state.consecutive_successes);
                state.consecutive_successes = 0;
                state.transition(CircuitState::Closed, now, &reason);
            }
        }
    }

    fn record_failure(&self) {
        let now = self.clock.now();
        let mut state = self.lock_state();
        state.total_failures += 1;
        state.consecutive_failures += 1;
        state.consecutive_successes = 0;

        match state.state {
            CircuitState::HalfOpen => {
                // One failure during recovery re-opens and restarts the timer.
                state.transition(CircuitState::Open, now, "failure during recovery attempt");
            }
            CircuitState::Closed if state.consecutive_failures >= self.config.failure_threshold => {
                let reason = format!("{} consecutive failures", state.consecutive_failures);
                state.transition(CircuitState::Open, now, &reason);
            }
            _ => {
                warn!(
                    consecutive_failures = state.consecutive_failures,
                    threshold = self.config.failure_threshold,
                    "circuit breaker recorded failure"
                );
            }
        }
    }

    /// Current state. A pending Open → HalfOpen transition is resolved by
    /// the next call, not by this pure read.
    pub fn state(&self) -> CircuitState {
        self.lock_state().state
    }

    /// Snapshot of counters for external monitoring.
    pub fn stats(&self) -> CircuitBreakerStats {
        let now = self.clock.now();
        let state = self.lock_state();
        CircuitBreakerStats {
            state: state.state,
            consecutive_failures: state.consecutive_failures,
            consecutive_successes: state.consecutive_successes,
            total_calls: state.total_calls,
            total_successes: state.total_successes,
            total_failures: state.total_failures,
            times_opened: state.times_opened,
            seconds_in_state: now.saturating_duration_since(state.last_transition).as_secs_f64(),
        }
    }

    /// Manually restore the closed state (operator action).
    pub fn reset(&self) {
        let now = self.clock.now();
        let mut state = self.lock_state();
        state.consecutive_failures = 0;
        state.consecutive_successes = 0;
        state.opened_at = None;
        state.transition(CircuitState::Closed, now, "manual reset");
    }

    /// Manually open the circuit (operator action).
    pub fn force_open(&self) {
        let now = self.clock.now();
        let mut state = self.lock_state();
        state.transition(CircuitState::Open, now, "manual override");
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("circuit breaker state lock poisoned");
            poisoned.into_inner()
        })
    }
}
