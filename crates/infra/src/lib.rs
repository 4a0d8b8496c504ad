//! # Tradewatch Infrastructure
//!
//! Infrastructure implementations of core domain ports.
//!
//! This crate contains:
//! - SQLite repositories for the checkpoint and dead-letter records
//! - HTTP adapters for the trade feed and the blockchain RPC endpoint
//! - The interval-driven ingestion worker
//! - Configuration loading (environment first, file fallback)
//!
//! ## Architecture
//! - Implements traits defined in `tradewatch-core`
//! - Depends on `tradewatch-common`, `tradewatch-domain` and
//!   `tradewatch-core`
//! - Contains all "impure" code (I/O, clocks, sockets)

pub mod config;
pub mod database;
pub mod feed;
pub mod ingest;
pub mod rpc;

// Re-export commonly used items
pub use database::{DbManager, SqliteCheckpointRepository, SqliteDlqRepository};
pub use feed::HttpTradeFeed;
pub use ingest::{IngestionWorker, IngestionWorkerConfig};
pub use rpc::JsonRpcClient;
