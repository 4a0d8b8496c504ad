//! Configuration loader
//!
//! Loads application configuration from environment variables or files.
//!
//! ## Loading Strategy
//! 1. First, attempts to load from environment variables
//! 2. If incomplete, falls back to loading from file
//! 3. Probes multiple paths for config files
//! 4. Supports JSON and TOML formats
//!
//! ## Environment Variables
//! - `TRADEWATCH_DB_PATH`: Database file path
//! - `TRADEWATCH_DB_POOL_SIZE`: Connection pool size
//! - `TRADEWATCH_FEED_URL`: Trade-feed base URL
//! - `TRADEWATCH_RPC_URL`: Blockchain RPC endpoint URL
//! - `TRADEWATCH_MIN_TRADE_USD`: Minimum notional to ingest
//! - `TRADEWATCH_POLL_INTERVAL`: Poll interval in seconds
//! - `TRADEWATCH_SOURCES`: Comma-separated source names
//!
//! Protection-stack knobs beyond these come from the config file; the
//! environment covers the deploy-varying surface only.
//!
//! ## File Locations
//! The loader probes `./config.{toml,json}` and `./tradewatch.{toml,json}`
//! in the working directory, then the same names one and two directories
//! up.

use std::path::{Path, PathBuf};

use tradewatch_domain::{Config, Result, TradewatchError};

/// Load configuration with automatic fallback strategy
///
/// First attempts to load from environment variables. If any required
/// variables are missing, falls back to loading from a config file, and
/// finally to built-in defaults.
pub fn load() -> Result<Config> {
    match load_from_env() {
        Ok(config) => {
            tracing::info!("configuration loaded from environment variables");
            Ok(config)
        }
        Err(e) => {
            tracing::debug!(error = ?e, "environment incomplete, trying config file");
            match load_from_file(None) {
                Ok(config) => Ok(config),
                Err(file_err) => {
                    tracing::info!(error = ?file_err, "no config file found, using defaults");
                    let config = Config::default();
                    config.validate()?;
                    Ok(config)
                }
            }
        }
    }
}

/// Load configuration from environment variables, overlaying the defaults.
///
/// `TRADEWATCH_DB_PATH` and `TRADEWATCH_FEED_URL` are required for the
/// environment to be considered authoritative; the remaining variables
/// override individual defaults when present.
pub fn load_from_env() -> Result<Config> {
    let mut config = Config::default();

    config.database.path = env_var("TRADEWATCH_DB_PATH")?;
    config.feed.base_url = env_var("TRADEWATCH_FEED_URL")?;

    if let Some(value) = optional_env("TRADEWATCH_DB_POOL_SIZE") {
        config.database.pool_size = parse_env("TRADEWATCH_DB_POOL_SIZE", &value)?;
    }
    if let Some(value) = optional_env("TRADEWATCH_RPC_URL") {
        config.rpc.url = value;
    }
    if let Some(value) = optional_env("TRADEWATCH_MIN_TRADE_USD") {
        config.feed.min_trade_usd = parse_env("TRADEWATCH_MIN_TRADE_USD", &value)?;
    }
    if let Some(value) = optional_env("TRADEWATCH_POLL_INTERVAL") {
        config.ingest.poll_interval_seconds = parse_env("TRADEWATCH_POLL_INTERVAL", &value)?;
    }
    if let Some(value) = optional_env("TRADEWATCH_SOURCES") {
        config.ingest.sources =
            value.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
    }

    config.validate()?;
    Ok(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, probes multiple locations for config files.
/// Supports both JSON and TOML formats (detected by file extension).
pub fn load_from_file(path: Option<PathBuf>) -> Result<Config> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(TradewatchError::Config(format!(
                    "config file not found: {}",
                    p.display()
                )));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            TradewatchError::Config("no config file found in any standard location".to_string())
        })?,
    };

    tracing::info!(path = %config_path.display(), "loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| TradewatchError::Config(format!("failed to read config file: {e}")))?;

    let config = parse_config(&contents, &config_path)?;
    config.validate()?;
    Ok(config)
}

fn parse_config(contents: &str, path: &Path) -> Result<Config> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| TradewatchError::Config(format!("invalid TOML format: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| TradewatchError::Config(format!("invalid JSON format: {e}"))),
        other => Err(TradewatchError::Config(format!("unsupported config format: {other}"))),
    }
}

fn probe_config_paths() -> Option<PathBuf> {
    let names = ["config.toml", "config.json", "tradewatch.toml", "tradewatch.json"];
    let prefixes = ["", "../", "../../"];

    for prefix in prefixes {
        for name in names {
            let candidate = PathBuf::from(format!("{prefix}{name}"));
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }
    None
}

fn env_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| TradewatchError::Config(format!("missing environment variable: {name}")))
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| TradewatchError::Config(format!("invalid value for {name}: {e}")))
}
