//! Token-bucket rate limiting for a single rate-limited dependency.
//!
//! Tokens refill continuously at `calls_per_second` up to `burst_size`,
//! computed lazily from elapsed wall-clock time on each call. There is no
//! background refill task; an idle limiter costs nothing. This is an
//! intentional portability choice, preserved from the original design.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use super::clock::{Clock, SystemClock};
use super::ConfigError;

/// The caller waited (or would have to wait) longer than its timeout for a
/// token. Surfaced as-is; never retried internally.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("rate limit timeout: next token in {needed:?}, caller allows {timeout:?}")]
pub struct RateLimitTimeout {
    /// Total wait the acquisition would have required.
    pub needed: Duration,
    /// The caller-supplied budget that was exceeded.
    pub timeout: Duration,
}

/// Configuration for [`RateLimiter`].
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Sustained token refill rate per second.
    pub calls_per_second: f64,
    /// Maximum tokens the bucket can hold (burst capacity).
    pub burst_size: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self { calls_per_second: 10.0, burst_size: 20 }
    }
}

impl RateLimiterConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.calls_per_second <= 0.0 || !self.calls_per_second.is_finite() {
            return Err(ConfigError::new("calls_per_second must be a positive number"));
        }
        if self.burst_size == 0 {
            return Err(ConfigError::new("burst_size must be at least 1"));
        }
        Ok(())
    }
}

/// Point-in-time counters for external monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterStats {
    pub total_calls: u64,
    pub total_waits: u64,
    pub total_wait_seconds: f64,
    pub current_tokens: f64,
    pub calls_per_second: f64,
    pub burst_size: u32,
}

/// Mutable bucket state, always accessed with the mutex held.
#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
    total_calls: u64,
    total_waits: u64,
    total_wait: Duration,
}

/// Token-bucket rate limiter.
///
/// Safe for concurrent callers; all state sits behind a single mutex and
/// waits happen outside the lock. The invariant `0 <= tokens <= burst_size`
/// holds at every exit from the critical section.
pub struct RateLimiter<C: Clock = SystemClock> {
    config: RateLimiterConfig,
    state: Mutex<BucketState>,
    clock: Arc<C>,
}

impl RateLimiter<SystemClock> {
    /// Create a limiter driven by the system clock.
    pub fn new(config: RateLimiterConfig) -> Result<Self, ConfigError> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> RateLimiter<C> {
    /// Create a limiter with a custom clock (used by tests).
    pub fn with_clock(config: RateLimiterConfig, clock: C) -> Result<Self, ConfigError> {
        config.validate()?;
        let state = BucketState {
            tokens: f64::from(config.burst_size),
            last_refill: clock.now(),
            total_calls: 0,
            total_waits: 0,
            total_wait: Duration::ZERO,
        };
        Ok(Self { config, state: Mutex::new(state), clock: Arc::new(clock) })
    }

    /// Refill tokens from elapsed time. Called with the lock held.
    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill);
        let refilled = elapsed.as_secs_f64() * self.config.calls_per_second;
        state.tokens = (state.tokens + refilled).min(f64::from(self.config.burst_size));
        state.last_refill = now;
    }

    /// Block until a token is available or `timeout` elapses.
    ///
    /// On success one token is consumed. When the deterministic wait for
    /// the next token exceeds the remaining budget, fails fast with
    /// [`RateLimitTimeout`] without sleeping at all. The wait itself is an
    /// ordinary `tokio` sleep, so dropping the future (e.g. from a
    /// `select!`) cancels it cleanly.
    pub async fn acquire(&self, timeout: Duration) -> Result<(), RateLimitTimeout> {
        let mut waited = Duration::ZERO;

        loop {
            // Tokens may have been taken by another caller while we slept,
            // so re-check under the lock each round.
            let wait = {
                let mut state = self.state.lock().unwrap_or_else(|poisoned| {
                    warn!("rate limiter state lock poisoned");
                    poisoned.into_inner()
                });
                self.refill(&mut state, self.clock.now());

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    state.total_calls += 1;
                    if !waited.is_zero() {
                        state.total_waits += 1;
                        state.total_wait += waited;
                    }
                    return Ok(());
                }

                let deficit = 1.0 - state.tokens;
                let needed = Duration::from_secs_f64(deficit / self.config.calls_per_second);
                if waited + needed > timeout {
                    debug!(
                        needed_ms = needed.as_millis() as u64,
                        timeout_ms = timeout.as_millis() as u64,
                        "rate limit acquisition would exceed timeout"
                    );
                    return Err(RateLimitTimeout { needed: waited + needed, timeout });
                }
                needed
            };

            if wait > Duration::from_secs(1) {
                warn!(
                    wait_secs = wait.as_secs_f64(),
                    rate = self.config.calls_per_second,
                    "rate limit reached, waiting for token"
                );
            }

            tokio::time::sleep(wait).await;
            waited += wait;
        }
    }

    /// Take a token without blocking. Returns `false` when none available.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| {
            warn!("rate limiter state lock poisoned");
            poisoned.into_inner()
        });
        self.refill(&mut state, self.clock.now());

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            state.total_calls += 1;
            true
        } else {
            false
        }
    }

    /// Running totals plus the current token level.
    pub fn stats(&self) -> RateLimiterStats {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| {
            warn!("rate limiter state lock poisoned");
            poisoned.into_inner()
        });
        self.refill(&mut state, self.clock.now());

        RateLimiterStats {
            total_calls: state.total_calls,
            total_waits: state.total_waits,
            total_wait_seconds: state.total_wait.as_secs_f64(),
            current_tokens: state.tokens,
            calls_per_second: self.config.calls_per_second,
            burst_size: self.config.burst_size,
        }
    }

    /// Restore the bucket to full capacity and zero the counters.
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| {
            warn!("rate limiter state lock poisoned");
            poisoned.into_inner()
        });
        state.tokens = f64::from(self.config.burst_size);
        state.last_refill = self.clock.now();
        state.total_calls = 0;
        state.total_waits = 0;
        state.total_wait = Duration::ZERO;
    }
}
