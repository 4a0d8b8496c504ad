//! Bounded exponential-backoff retry driver.
//!
//! The executor retries an operation up to `max_retries` additional times
//! with delay `min(base_delay * 2^attempt, max_delay)` between attempts and
//! re-raises the last error once the budget is spent.
//!
//! Errors opt into retrying through [`Retryable`]. Protection-stack
//! rejections are terminal by definition: a [`CircuitOpen`] means a higher
//! guard already judged the dependency unavailable, and a
//! [`RateLimitTimeout`] means the caller's wait budget is spent. Burning
//! retries on either wastes time against a known-unavailable dependency.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use super::circuit_breaker::CircuitOpen;
use super::rate_limiter::RateLimitTimeout;
use super::ConfigError;

/// Classifies whether an error is worth another attempt.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for CircuitOpen {
    fn is_retryable(&self) -> bool {
        false
    }
}

impl Retryable for RateLimitTimeout {
    fn is_retryable(&self) -> bool {
        false
    }
}

/// Errors produced by [`RetryExecutor::execute`].
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every attempt failed; carries the last error.
    #[error("operation failed after {attempts} attempts: {source}")]
    Exhausted { attempts: u32, source: E },

    /// The operation failed with an error that must not be retried.
    #[error("operation failed with non-retryable error: {source}")]
    NonRetryable { source: E },
}

impl<E> RetryError<E> {
    /// The underlying error, regardless of how retrying ended.
    pub fn into_source(self) -> E {
        match self {
            RetryError::Exhausted { source, .. } | RetryError::NonRetryable { source } => source,
        }
    }
}

/// Configuration for [`RetryExecutor`].
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Additional attempts after the first (0 = no retries).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single backoff delay.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_delay.is_zero() {
            return Err(ConfigError::new("base_delay must be greater than zero"));
        }
        if self.max_delay < self.base_delay {
            return Err(ConfigError::new("max_delay must not be below base_delay"));
        }
        Ok(())
    }
}

/// Drives an operation through bounded exponential-backoff retries.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Backoff before retry number `attempt` (0-based), capped at
    /// `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponential = self.config.base_delay.as_secs_f64() * 2f64.powi(attempt as i32);
        Duration::from_secs_f64(exponential.min(self.config.max_delay.as_secs_f64()))
    }

    /// Invoke `op`, retrying retryable failures up to the configured bound.
    pub async fn execute<F, Fut, T, E>(&self, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Display,
    {
        let attempts = self.config.max_retries + 1;
        let mut attempt = 0;

        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(retries = attempt, "operation succeeded after retrying");
                    }
                    return Ok(value);
                }
                Err(err) if !err.is_retryable() => {
                    debug!(error = %err, "error is not retryable, giving up");
                    return Err(RetryError::NonRetryable { source: err });
                }
                Err(err) => {
                    if attempt + 1 >= attempts {
                        warn!(attempts, error = %err, "retry budget exhausted");
                        return Err(RetryError::Exhausted { attempts, source: err });
                    }
                    let delay = self.delay_for(attempt);
                    warn!(
                        attempt = attempt + 1,
                        attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "operation failed, retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    #[derive(Debug)]
    enum TestError {
        Transient,
        Fatal,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                TestError::Transient => write!(f, "transient"),
                TestError::Fatal => write!(f, "fatal"),
            }
        }
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            matches!(self, TestError::Transient)
        }
    }

    fn executor(max_retries: u32) -> RetryExecutor {
        RetryExecutor::new(RetryConfig {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(8),
        })
        .unwrap()
    }

    #[test]
    fn config_validation() {
        let mut config = RetryConfig::default();
        assert!(config.validate().is_ok());

        config.base_delay = Duration::ZERO;
        assert!(config.validate().is_err());

        config.base_delay = Duration::from_secs(10);
        config.max_delay = Duration::from_secs(1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn backoff_doubles_and_caps_at_max_delay() {
        let executor = RetryExecutor::new(RetryConfig {
            max_retries: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        })
        .unwrap();

        assert_eq!(executor.delay_for(0), Duration::from_secs(1));
        assert_eq!(executor.delay_for(1), Duration::from_secs(2));
        assert_eq!(executor.delay_for(2), Duration::from_secs(4));
        assert_eq!(executor.delay_for(4), Duration::from_secs(16));
        assert_eq!(executor.delay_for(5), Duration::from_secs(30));
        assert_eq!(executor.delay_for(20), Duration::from_secs(30));

        // Non-decreasing across the whole range
        let mut previous = Duration::ZERO;
        for attempt in 0..16 {
            let delay = executor.delay_for(attempt);
            assert!(delay >= previous);
            previous = delay;
        }
    }

    #[tokio::test]
    async fn failing_n_times_then_succeeding_invokes_n_plus_one() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result = executor(5)
            .execute(|| {
                let calls = Arc::clone(&calls_clone);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                        Err(TestError::Transient)
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn exhausts_retry_budget_and_reports_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result: Result<(), _> = executor(2)
            .execute(|| {
                let calls = Arc::clone(&calls_clone);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(TestError::Transient)
                }
            })
            .await;

        match result {
            Err(RetryError::Exhausted { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected exhaustion, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_stops_after_one_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result: Result<(), _> = executor(5)
            .execute(|| {
                let calls = Arc::clone(&calls_clone);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(TestError::Fatal)
                }
            })
            .await;

        assert!(matches!(result, Err(RetryError::NonRetryable { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn protection_stack_rejections_are_never_retryable() {
        let open = CircuitOpen { consecutive_failures: 5, open_for: Duration::from_secs(1) };
        assert!(!open.is_retryable());

        let timeout = RateLimitTimeout {
            needed: Duration::from_secs(2),
            timeout: Duration::from_secs(1),
        };
        assert!(!timeout.is_retryable());
    }
}
