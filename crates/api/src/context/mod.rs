//! Application context - dependency injection container.
//!
//! Builds the whole object graph once at startup: the database manager,
//! the two repositories, one protection gateway per outbound dependency
//! (shared by every call site hitting that dependency), and one ingestion
//! worker per configured source. Nothing here is a global; everything is
//! passed by `Arc` from this container.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};
use tradewatch_common::{GatewayStats, ProtectedGateway};
use tradewatch_core::{
    CheckpointStore, DeadLetterQueue, IngestionService, IngestionSettings, ItemProcessor,
    TradeFeedSource,
};
use tradewatch_domain::{Config, Result, TradewatchError};
use tradewatch_infra::config::protection_config;
use tradewatch_infra::database::{DbManager, DlqSettings, SqliteCheckpointRepository, SqliteDlqRepository};
use tradewatch_infra::ingest::{IngestionWorker, IngestionWorkerConfig};
use tradewatch_infra::{HttpTradeFeed, JsonRpcClient};

use crate::processor::AuditProcessor;

/// Combined protection snapshot for external monitoring, one entry per
/// guarded dependency.
#[derive(Debug, Clone, Serialize)]
pub struct ProtectionStats {
    pub trade_feed: GatewayStats,
    pub rpc: GatewayStats,
}

/// Application context - holds all services and dependencies.
pub struct AppContext {
    pub config: Config,
    pub db: Arc<DbManager>,
    pub checkpoints: Arc<SqliteCheckpointRepository>,
    pub dead_letters: Arc<SqliteDlqRepository>,
    pub rpc: Arc<JsonRpcClient>,

    feed_gateway: Arc<ProtectedGateway>,
    rpc_gateway: Arc<ProtectedGateway>,
    workers: Vec<IngestionWorker>,
}

impl AppContext {
    /// Wire the full dependency graph. Does not start any workers.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let db = Arc::new(DbManager::new(&config.database.path, config.database.pool_size)?);
        db.run_migrations()?;

        let feed_gateway = Arc::new(
            ProtectedGateway::new("trade-feed", protection_config(&config.feed.protection))
                .map_err(|e| TradewatchError::Config(e.to_string()))?,
        );
        let rpc_gateway = Arc::new(
            ProtectedGateway::new("rpc", protection_config(&config.rpc.protection))
                .map_err(|e| TradewatchError::Config(e.to_string()))?,
        );

        let feed: Arc<dyn TradeFeedSource> =
            Arc::new(HttpTradeFeed::new(&config.feed, Arc::clone(&feed_gateway))?);
        let rpc = Arc::new(JsonRpcClient::new(&config.rpc, Arc::clone(&rpc_gateway))?);

        let checkpoints = Arc::new(SqliteCheckpointRepository::new(Arc::clone(&db)));
        let dead_letters = Arc::new(SqliteDlqRepository::new(
            Arc::clone(&db),
            DlqSettings {
                max_attempts: config.ingest.dlq_max_attempts,
                base_delay: Duration::from_secs(config.ingest.dlq_base_delay_seconds),
                max_delay: Duration::from_secs(config.ingest.dlq_max_delay_seconds),
            },
        ));

        let processor: Arc<dyn ItemProcessor> = Arc::new(AuditProcessor::new());

        let worker_config = IngestionWorkerConfig {
            poll_interval: Duration::from_secs(config.ingest.poll_interval_seconds),
            cycle_timeout: Duration::from_secs(config.ingest.cycle_timeout_seconds),
            ..IngestionWorkerConfig::default()
        };

        let workers = config
            .ingest
            .sources
            .iter()
            .map(|source| {
                let service = Arc::new(IngestionService::new(
                    IngestionSettings::for_source(source.as_str(), &config.ingest),
                    Arc::clone(&feed),
                    Arc::clone(&processor),
                    Arc::clone(&checkpoints) as Arc<dyn CheckpointStore>,
                    Arc::clone(&dead_letters) as Arc<dyn DeadLetterQueue>,
                ));
                IngestionWorker::new(service, worker_config.clone())
            })
            .collect();

        Ok(Self {
            config,
            db,
            checkpoints,
            dead_letters,
            rpc,
            feed_gateway,
            rpc_gateway,
            workers,
        })
    }

    /// Start one polling worker per configured source.
    pub fn start_workers(&mut self) -> Result<()> {
        for worker in &mut self.workers {
            worker.start()?;
        }
        info!(workers = self.workers.len(), "ingestion workers started");
        Ok(())
    }

    /// Stop all workers, logging rather than aborting on join problems.
    pub async fn stop_workers(&mut self) {
        for worker in &mut self.workers {
            if worker.is_running() {
                if let Err(e) = worker.stop().await {
                    warn!(error = %e, "worker did not stop cleanly");
                }
            }
        }
    }

    /// Combined rate-limiter and circuit-breaker internals for external
    /// monitoring and alerting.
    pub fn protection_stats(&self) -> ProtectionStats {
        ProtectionStats {
            trade_feed: self.feed_gateway.stats(),
            rpc: self.rpc_gateway.stats(),
        }
    }
}
