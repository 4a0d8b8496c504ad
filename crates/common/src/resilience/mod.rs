//! Resilience patterns for calling unreliable, rate-limited dependencies.
//!
//! The primitives compose into a single protection stack per dependency:
//!
//! ```text
//! CircuitBreaker            (outermost: is an attempt allowed at all?)
//!   └─ RetryExecutor        (drives up to N tries with backoff)
//!        └─ RateLimiter     (one token per try)
//!             └─ raw call
//! ```
//!
//! [`ProtectedGateway`] wires the three together and is the only entry
//! point production code should need; the primitives stay public so tests
//! and special call sites can use them directly.
//!
//! A limiter/breaker pair is scoped to exactly one dependency. Sharing an
//! instance across unrelated dependencies couples their failure domains;
//! constructing a second instance for the same dependency splits its rate
//! budget. Both are wiring bugs, not library concerns.
//!
//! State lives behind in-process mutexes. Nothing here coordinates across
//! OS processes; running two processes against the same dependency doubles
//! the effective rate limit.

pub mod circuit_breaker;
pub mod clock;
pub mod gateway;
pub mod rate_limiter;
pub mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitOpen, CircuitState,
};
pub use clock::{Clock, MockClock, SystemClock};
pub use gateway::{GatewayError, GatewayStats, ProtectedGateway, ProtectionConfig};
pub use rate_limiter::{RateLimitTimeout, RateLimiter, RateLimiterConfig, RateLimiterStats};
pub use retry::{Retryable, RetryConfig, RetryError, RetryExecutor};

use thiserror::Error;

/// Rejected configuration values.
#[derive(Debug, Error)]
#[error("invalid configuration: {message}")]
pub struct ConfigError {
    pub message: String,
}

impl ConfigError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}
