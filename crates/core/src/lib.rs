//! # Tradewatch Core
//!
//! Pure business logic layer - no infrastructure dependencies.
//!
//! This crate contains:
//! - Port/adapter interfaces (traits) for the feed, the processor, and the
//!   two durable records
//! - The per-cycle ingestion state machine ([`IngestionService`])
//!
//! ## Architecture Principles
//! - Only depends on `tradewatch-domain`
//! - No database, HTTP, or runtime code
//! - All external dependencies via traits
//! - Pure, testable business logic

pub mod ingest;

// Re-export specific items to avoid ambiguity
pub use ingest::ports::{CheckpointStore, DeadLetterQueue, ItemProcessor, TradeFeedSource};
pub use ingest::service::{IngestionService, IngestionSettings};
