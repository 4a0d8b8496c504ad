//! Configuration loading and conversion helpers.

pub mod loader;

pub use loader::{load, load_from_env, load_from_file};

use std::time::Duration;

use tradewatch_common::{
    CircuitBreakerConfig, ProtectionConfig, RateLimiterConfig, RetryConfig,
};
use tradewatch_domain::ProtectionSettings;

/// Bridge the serde-facing settings into the resilience library's config.
pub fn protection_config(settings: &ProtectionSettings) -> ProtectionConfig {
    ProtectionConfig {
        rate_limiter: RateLimiterConfig {
            calls_per_second: settings.calls_per_second,
            burst_size: settings.burst_size,
        },
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: settings.failure_threshold,
            recovery_timeout: Duration::from_secs_f64(settings.recovery_timeout_seconds),
            success_threshold: settings.success_threshold,
        },
        retry: RetryConfig {
            max_retries: settings.max_retries,
            base_delay: Duration::from_secs_f64(settings.base_delay_seconds),
            max_delay: Duration::from_secs_f64(settings.max_delay_seconds),
        },
        acquire_timeout: Duration::from_secs_f64(settings.acquire_timeout_seconds),
    }
}
