//! Ingestion worker for one named polling source.
//!
//! Owns the timing around [`IngestionService`]: a fixed-interval loop with
//! drift correction (ticks are scheduled relative to cycle start, not
//! cycle end, so slow cycles do not accumulate delay), a per-cycle
//! timeout, and cooperative cancellation. Join handles are tracked and
//! `stop()` waits for the loop to wind down.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use tradewatch_infra::ingest::{IngestionWorker, IngestionWorkerConfig};
//!
//! # async fn example(service: Arc<tradewatch_core::IngestionService>) -> Result<(), Box<dyn std::error::Error>> {
//! let mut worker = IngestionWorker::new(
//!     service,
//!     IngestionWorkerConfig {
//!         poll_interval: Duration::from_secs(60),
//!         ..Default::default()
//!     },
//! );
//!
//! worker.start()?;
//! // ... application runs ...
//! worker.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tradewatch_core::IngestionService;
use tradewatch_domain::{Result, TradewatchError};

/// Configuration for the ingestion worker.
#[derive(Debug, Clone)]
pub struct IngestionWorkerConfig {
    /// Interval between cycle starts.
    pub poll_interval: Duration,
    /// Timeout for a single cycle.
    pub cycle_timeout: Duration,
    /// Join timeout when stopping.
    pub join_timeout: Duration,
}

impl Default for IngestionWorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            cycle_timeout: Duration::from_secs(300),
            join_timeout: Duration::from_secs(5),
        }
    }
}

/// Polling-loop driver with explicit lifecycle management.
pub struct IngestionWorker {
    service: Arc<IngestionService>,
    config: IngestionWorkerConfig,
    cancellation: CancellationToken,
    task_handle: Option<JoinHandle<()>>,
}

impl IngestionWorker {
    pub fn new(service: Arc<IngestionService>, config: IngestionWorkerConfig) -> Self {
        Self { service, config, cancellation: CancellationToken::new(), task_handle: None }
    }

    /// Start the worker, spawning the background polling loop.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(TradewatchError::Internal("worker already running".into()));
        }

        info!(source = %self.service.source_name(), "starting ingestion worker");

        self.cancellation = CancellationToken::new();
        let service = Arc::clone(&self.service);
        let poll_interval = self.config.poll_interval;
        let cycle_timeout = self.config.cycle_timeout;
        let cancel = self.cancellation.clone();

        let handle = tokio::spawn(async move {
            Self::poll_loop(service, poll_interval, cycle_timeout, cancel).await;
        });

        self.task_handle = Some(handle);
        Ok(())
    }

    /// Stop the worker and wait for the polling loop to finish.
    pub async fn stop(&mut self) -> Result<()> {
        if !self.is_running() {
            return Err(TradewatchError::Internal("worker not running".into()));
        }

        info!(source = %self.service.source_name(), "stopping ingestion worker");
        self.cancellation.cancel();

        if let Some(handle) = self.task_handle.take() {
            match tokio::time::timeout(self.config.join_timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(error = %e, "worker task panicked");
                    return Err(TradewatchError::Internal("worker task panicked".into()));
                }
                Err(_) => {
                    warn!("worker task did not complete within join timeout");
                    return Err(TradewatchError::Internal("worker join timeout".into()));
                }
            }
        }

        self.cancellation = CancellationToken::new();
        info!(source = %self.service.source_name(), "ingestion worker stopped");
        Ok(())
    }

    /// Returns true while the polling loop is active.
    pub fn is_running(&self) -> bool {
        self.task_handle.is_some()
    }

    /// Background polling loop.
    ///
    /// `tokio::time::interval` keeps ticks on the fixed schedule derived
    /// from the loop start; a cycle that overruns its slot skips the
    /// missed ticks instead of bursting to catch up.
    async fn poll_loop(
        service: Arc<IngestionService>,
        poll_interval: Duration,
        cycle_timeout: Duration,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(source = %service.source_name(), "poll loop cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    let poll_start = Utc::now();

                    // Racing the cycle against cancellation keeps stop()
                    // prompt even mid-backoff or mid-acquire; dropping the
                    // cycle future unwinds those sleeps cleanly.
                    let outcome = tokio::select! {
                        _ = cancel.cancelled() => {
                            debug!(source = %service.source_name(), "cycle interrupted by shutdown");
                            break;
                        }
                        outcome = tokio::time::timeout(cycle_timeout, service.run_cycle(poll_start)) => outcome,
                    };

                    match outcome {
                        Ok(Ok(report)) => {
                            debug!(
                                source = %service.source_name(),
                                fetched = report.fetched,
                                processed = report.processed,
                                failed = report.failed,
                                dlq_resolved = report.dead_letters_resolved,
                                dlq_retried = report.dead_letters_retried,
                                dlq_abandoned = report.dead_letters_abandoned,
                                advanced = report.checkpoint_advanced,
                                "cycle complete"
                            );
                        }
                        Ok(Err(e)) => {
                            error!(source = %service.source_name(), error = %e, "cycle failed");
                        }
                        Err(_) => {
                            warn!(
                                source = %service.source_name(),
                                timeout_secs = cycle_timeout.as_secs(),
                                "cycle timed out"
                            );
                        }
                    }
                }
            }
        }
    }
}

impl Drop for IngestionWorker {
    fn drop(&mut self) {
        if self.is_running() {
            warn!("IngestionWorker dropped while running; cancelling task");
            self.cancellation.cancel();
        }
    }
}
