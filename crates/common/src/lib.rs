//! Shared resilience utilities for tradewatch crates.
//!
//! This crate contains the generic call-protection building blocks used
//! around every outbound dependency:
//! - token-bucket rate limiting ([`resilience::RateLimiter`])
//! - circuit breaking ([`resilience::CircuitBreaker`])
//! - bounded exponential-backoff retries ([`resilience::RetryExecutor`])
//! - the composed [`resilience::ProtectedGateway`]
//!
//! Everything here is generic over the operation's error type and carries
//! no domain knowledge. Time is abstracted behind [`resilience::Clock`] so
//! timeout behaviour is testable without real delays.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod resilience;

// Re-export commonly used types for convenience
pub use resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitOpen, CircuitState, Clock,
    ConfigError, GatewayError, GatewayStats, MockClock, ProtectedGateway, ProtectionConfig,
    RateLimitTimeout, RateLimiter, RateLimiterConfig, RateLimiterStats, Retryable, RetryConfig,
    RetryError, RetryExecutor, SystemClock,
};
