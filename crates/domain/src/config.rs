//! Application configuration structures.
//!
//! Serde-deserializable from TOML or JSON; every field has a default so a
//! partial config file is valid. Defaults mirror the limits of typical
//! public endpoints (10 rps sustained, burst of 20) and a 60 s polling
//! cadence with a 5 s overlap buffer.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, TradewatchError};

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

/// SQLite database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
    pub pool_size: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: "tradewatch.db".into(), pool_size: 4 }
    }
}

/// Trade-feed API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub base_url: String,
    /// Trades below this notional are ignored by the feed adapter.
    pub min_trade_usd: f64,
    pub request_timeout_seconds: u64,
    /// Page size for the paged /trades endpoint.
    pub page_limit: u32,
    #[serde(default)]
    pub protection: ProtectionSettings,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: "https://data-api.polymarket.com".into(),
            min_trade_usd: 10_000.0,
            request_timeout_seconds: 30,
            page_limit: 1000,
            protection: ProtectionSettings::default(),
        }
    }
}

/// Blockchain JSON-RPC endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub url: String,
    pub request_timeout_seconds: u64,
    #[serde(default)]
    pub protection: ProtectionSettings,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: "https://polygon-rpc.com".into(),
            request_timeout_seconds: 30,
            protection: ProtectionSettings::default(),
        }
    }
}

/// Protection-stack knobs for one rate-limited dependency.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtectionSettings {
    pub calls_per_second: f64,
    pub burst_size: u32,
    pub failure_threshold: u32,
    pub recovery_timeout_seconds: f64,
    pub success_threshold: u32,
    pub max_retries: u32,
    pub base_delay_seconds: f64,
    pub max_delay_seconds: f64,
    pub acquire_timeout_seconds: f64,
}

impl Default for ProtectionSettings {
    fn default() -> Self {
        Self {
            calls_per_second: 10.0,
            burst_size: 20,
            failure_threshold: 5,
            recovery_timeout_seconds: 60.0,
            success_threshold: 2,
            max_retries: 3,
            base_delay_seconds: 1.0,
            max_delay_seconds: 30.0,
            acquire_timeout_seconds: 30.0,
        }
    }
}

/// Polling-loop and dead-letter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Named sources, each running its own polling loop.
    pub sources: Vec<String>,
    pub poll_interval_seconds: u64,
    /// Deliberately re-scanned window compensating for clock skew and
    /// in-flight writes at the feed.
    pub overlap_buffer_seconds: u64,
    /// Window for the very first poll of a source with no checkpoint.
    pub initial_lookback_seconds: u64,
    pub dlq_max_attempts: u32,
    pub dlq_base_delay_seconds: u64,
    pub dlq_max_delay_seconds: u64,
    /// Upper bound on dead letters reprocessed per cycle.
    pub dlq_drain_batch: usize,
    /// Hard ceiling on a single cycle's duration.
    pub cycle_timeout_seconds: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            sources: vec!["trade-feed".into()],
            poll_interval_seconds: 60,
            overlap_buffer_seconds: 5,
            initial_lookback_seconds: 3600,
            dlq_max_attempts: 5,
            dlq_base_delay_seconds: 60,
            dlq_max_delay_seconds: 3600,
            dlq_drain_batch: 25,
            cycle_timeout_seconds: 300,
        }
    }
}

impl Config {
    /// Reject configurations that cannot work at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.database.path.trim().is_empty() {
            return Err(TradewatchError::Config("database.path must not be empty".into()));
        }
        if self.database.pool_size == 0 {
            return Err(TradewatchError::Config("database.pool_size must be at least 1".into()));
        }
        if self.feed.base_url.trim().is_empty() {
            return Err(TradewatchError::Config("feed.base_url must not be empty".into()));
        }
        if self.feed.min_trade_usd < 0.0 {
            return Err(TradewatchError::Config("feed.min_trade_usd must not be negative".into()));
        }
        if self.feed.page_limit == 0 {
            return Err(TradewatchError::Config("feed.page_limit must be at least 1".into()));
        }
        if self.rpc.url.trim().is_empty() {
            return Err(TradewatchError::Config("rpc.url must not be empty".into()));
        }
        if self.ingest.sources.is_empty() {
            return Err(TradewatchError::Config("ingest.sources must name a source".into()));
        }
        if self.ingest.poll_interval_seconds == 0 {
            return Err(TradewatchError::Config(
                "ingest.poll_interval_seconds must be at least 1".into(),
            ));
        }
        if self.ingest.dlq_max_attempts == 0 {
            return Err(TradewatchError::Config(
                "ingest.dlq_max_attempts must be at least 1".into(),
            ));
        }
        if self.ingest.dlq_drain_batch == 0 {
            return Err(TradewatchError::Config(
                "ingest.dlq_drain_batch must be at least 1".into(),
            ));
        }
        for settings in [&self.feed.protection, &self.rpc.protection] {
            validate_protection(settings)?;
        }
        Ok(())
    }
}

fn validate_protection(settings: &ProtectionSettings) -> Result<()> {
    if settings.calls_per_second <= 0.0 {
        return Err(TradewatchError::Config("calls_per_second must be positive".into()));
    }
    if settings.burst_size == 0 {
        return Err(TradewatchError::Config("burst_size must be at least 1".into()));
    }
    if settings.failure_threshold == 0 || settings.success_threshold == 0 {
        return Err(TradewatchError::Config(
            "circuit breaker thresholds must be at least 1".into(),
        ));
    }
    if settings.recovery_timeout_seconds <= 0.0 {
        return Err(TradewatchError::Config("recovery_timeout_seconds must be positive".into()));
    }
    if settings.base_delay_seconds <= 0.0
        || settings.max_delay_seconds < settings.base_delay_seconds
    {
        return Err(TradewatchError::Config(
            "retry delays must be positive with max_delay >= base_delay".into(),
        ));
    }
    if settings.acquire_timeout_seconds <= 0.0 {
        return Err(TradewatchError::Config("acquire_timeout_seconds must be positive".into()));
    }
    Ok(())
}
