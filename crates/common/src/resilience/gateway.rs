//! Composed protection stack for one outbound dependency.
//!
//! [`ProtectedGateway`] layers the primitives with the circuit breaker as
//! the outermost guard: it decides, before anything else, whether an
//! attempt is even allowed. Inside an admitted attempt the retry executor
//! drives up to N tries, and each try first acquires a rate-limit token,
//! then performs the raw call.
//!
//! The outcome is a tagged result: [`GatewayError::Unavailable`] for a
//! circuit-open rejection, never a bare empty value a caller could mistake
//! for legitimate data.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use super::circuit_breaker::{
    BreakerError, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitOpen,
    CircuitState,
};
use super::clock::{Clock, SystemClock};
use super::rate_limiter::{RateLimitTimeout, RateLimiter, RateLimiterConfig, RateLimiterStats};
use super::retry::{RetryConfig, RetryError, RetryExecutor, Retryable};
use super::ConfigError;

/// Full configuration for one dependency's protection stack.
#[derive(Debug, Clone)]
pub struct ProtectionConfig {
    pub rate_limiter: RateLimiterConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry: RetryConfig,
    /// Budget for each try's token acquisition.
    pub acquire_timeout: Duration,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            rate_limiter: RateLimiterConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

impl ProtectionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rate_limiter.validate()?;
        self.circuit_breaker.validate()?;
        self.retry.validate()?;
        if self.acquire_timeout.is_zero() {
            return Err(ConfigError::new("acquire_timeout must be greater than zero"));
        }
        Ok(())
    }
}

/// Tagged outcome of a protected call.
#[derive(Debug, Error)]
pub enum GatewayError<E> {
    /// The circuit breaker rejected the call; the dependency is presumed
    /// down and the raw call was never made.
    #[error("dependency unavailable: {0}")]
    Unavailable(CircuitOpen),

    /// No token became available within the acquisition budget.
    #[error("{0}")]
    RateLimitTimeout(RateLimitTimeout),

    /// The call ran and failed every attempt; carries the last error.
    #[error("call failed after {attempts} attempts: {source}")]
    Exhausted { attempts: u32, source: E },
}

impl<E> GatewayError<E> {
    /// True when the failure means "temporarily unavailable" rather than a
    /// call-level error.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, GatewayError::Unavailable(_))
    }
}

/// Combined monitoring snapshot of both stateful primitives.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayStats {
    pub rate_limiter: RateLimiterStats,
    pub circuit_breaker: CircuitBreakerStats,
}

/// Per-try failure inside the retry loop. Rate-limit timeouts are surfaced
/// rather than retried; everything else from the raw call is transient.
#[derive(Debug, Error)]
enum TryError<E> {
    #[error("{0}")]
    RateLimit(RateLimitTimeout),
    #[error("{0}")]
    Call(E),
}

impl<E> Retryable for TryError<E> {
    fn is_retryable(&self) -> bool {
        matches!(self, TryError::Call(_))
    }
}

/// Rate limiter + circuit breaker + retry around an arbitrary async call.
///
/// Construct one gateway per rate-limited dependency at startup and share
/// it (via `Arc`) across every call site hitting that dependency.
pub struct ProtectedGateway<C: Clock = SystemClock> {
    name: String,
    limiter: RateLimiter<C>,
    breaker: CircuitBreaker<C>,
    retry: RetryExecutor,
    acquire_timeout: Duration,
}

impl ProtectedGateway<SystemClock> {
    pub fn new(name: impl Into<String>, config: ProtectionConfig) -> Result<Self, ConfigError> {
        Self::with_clock(name, config, SystemClock)
    }
}

impl<C: Clock + Clone> ProtectedGateway<C> {
    pub fn with_clock(
        name: impl Into<String>,
        config: ProtectionConfig,
        clock: C,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            limiter: RateLimiter::with_clock(config.rate_limiter, clock.clone())?,
            breaker: CircuitBreaker::with_clock(config.circuit_breaker, clock)?,
            retry: RetryExecutor::new(config.retry)?,
            acquire_timeout: config.acquire_timeout,
        })
    }
}

impl<C: Clock> ProtectedGateway<C> {
    /// Run `op` through the full protection stack.
    ///
    /// `op` is called once per try; each produced future is awaited only
    /// after a rate-limit token has been acquired for that try.
    pub async fn call<F, Fut, T, E>(&self, mut op: F) -> Result<T, GatewayError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let outcome = self
            .breaker
            .call(|| {
                self.retry.execute(|| {
                    let raw_call = op();
                    let admission = self.limiter.acquire(self.acquire_timeout);
                    async move {
                        admission.await.map_err(TryError::RateLimit)?;
                        raw_call.await.map_err(TryError::Call)
                    }
                })
            })
            .await;

        match outcome {
            Ok(value) => Ok(value),
            Err(BreakerError::Open(open)) => {
                warn!(
                    gateway = %self.name,
                    consecutive_failures = open.consecutive_failures,
                    open_for_ms = open.open_for.as_millis() as u64,
                    "call rejected, dependency circuit is open"
                );
                Err(GatewayError::Unavailable(open))
            }
            Err(BreakerError::Operation(retry_err)) => Err(Self::map_retry_error(retry_err)),
        }
    }

    fn map_retry_error<E>(err: RetryError<TryError<E>>) -> GatewayError<E> {
        match err {
            RetryError::NonRetryable { source: TryError::RateLimit(timeout) }
            | RetryError::Exhausted { source: TryError::RateLimit(timeout), .. } => {
                GatewayError::RateLimitTimeout(timeout)
            }
            RetryError::Exhausted { attempts, source: TryError::Call(source) } => {
                GatewayError::Exhausted { attempts, source }
            }
            // Raw-call errors are always classified transient, so this arm
            // only exists to keep the match exhaustive.
            RetryError::NonRetryable { source: TryError::Call(source) } => {
                GatewayError::Exhausted { attempts: 1, source }
            }
        }
    }

    /// Combined rate-limiter and circuit-breaker snapshot.
    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            rate_limiter: self.limiter.stats(),
            circuit_breaker: self.breaker.stats(),
        }
    }

    /// Current circuit state of the guarded dependency.
    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
