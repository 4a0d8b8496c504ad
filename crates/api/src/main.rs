//! Tradewatch - resilient trade-feed monitoring daemon.
//!
//! Main entry point: logging, environment, configuration, context wiring,
//! then one ingestion worker per source until Ctrl-C.

use tracing::{info, warn};
use tradewatch_api::AppContext;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging FIRST so .env loading is visible
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load environment variables from .env file
    match dotenvy::dotenv() {
        Ok(path) => info!(path = %path.display(), "loaded .env"),
        Err(e) => info!(error = %e, "no .env file loaded"),
    }

    let config = tradewatch_infra::config::load()?;
    info!(
        sources = ?config.ingest.sources,
        poll_interval_s = config.ingest.poll_interval_seconds,
        overlap_s = config.ingest.overlap_buffer_seconds,
        "configuration loaded"
    );

    let mut ctx = AppContext::new(config)?;
    ctx.start_workers()?;
    info!("tradewatch running; press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    ctx.stop_workers().await;

    match serde_json::to_string_pretty(&ctx.protection_stats()) {
        Ok(stats) => info!(stats = %stats, "final protection stats"),
        Err(e) => warn!(error = %e, "failed to serialize protection stats"),
    }

    Ok(())
}
