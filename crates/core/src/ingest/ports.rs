//! Port interfaces for the ingestion pipeline.
//!
//! Infrastructure implements these traits; the core service only ever
//! talks to the ports. `TradeFeedSource` and `ItemProcessor` are the
//! external collaborators named by the system contract; `CheckpointStore`
//! and `DeadLetterQueue` are the two durable records this core owns.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tradewatch_domain::{
    DeadLetterStatus, DeadLetterTrade, PollCheckpoint, ProcessError, Result, TradeEvent,
};

/// Ordered access to the external trade feed.
#[async_trait]
pub trait TradeFeedSource: Send + Sync {
    /// Fetch all trades with timestamp in `[since, until]`, oldest first.
    /// Every record carries a unique external key.
    async fn fetch(&self, since: DateTime<Utc>, until: DateTime<Utc>)
        -> Result<Vec<TradeEvent>>;
}

/// Downstream processing of one trade.
///
/// Implementations must be idempotent, keyed by the item's external key:
/// the overlap buffer re-fetches already-processed items by design, and
/// dead-letter draining replays them.
#[async_trait]
pub trait ItemProcessor: Send + Sync {
    async fn process(&self, item: &TradeEvent) -> std::result::Result<(), ProcessError>;
}

/// Durable, monotonic progress cursor per named source.
///
/// Upsert keyed by `source_name`. Assumes a single active writer per
/// source name; concurrent writers would risk a watermark regression via
/// last-write-wins (documented limitation, see DESIGN.md).
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// The stored checkpoint, or `None` for a source never seen before.
    async fn get(&self, source_name: &str) -> Result<Option<PollCheckpoint>>;

    /// Persist the new watermark. Callers must only invoke this after the
    /// entire batch is confirmed fully and successfully processed.
    async fn save(
        &self,
        source_name: &str,
        watermark: DateTime<Utc>,
        processed_in_batch: u64,
    ) -> Result<()>;

    /// Persist failure metadata without moving an existing watermark.
    ///
    /// `watermark` is the cursor the failed cycle polled from; it is only
    /// stored when the source has no row yet, so even a first-cycle
    /// failure pins its window durably.
    async fn record_failure(
        &self,
        source_name: &str,
        watermark: DateTime<Utc>,
        reason: &str,
        failed_in_batch: u64,
    ) -> Result<()>;
}

/// Durable holding area and backoff schedule for failed work items.
#[async_trait]
pub trait DeadLetterQueue: Send + Sync {
    /// Insert a new item, or bump the failure count of an existing
    /// PENDING/RETRYING item with the same key (no duplicates per key).
    async fn add(&self, trade_key: &str, payload: &serde_json::Value, reason: &str)
        -> Result<()>;

    /// PENDING/RETRYING items whose `next_retry_at <= now`, oldest first,
    /// capped at `limit`. Items that have never been scheduled (no
    /// `next_retry_at` yet) are due immediately.
    async fn get_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<DeadLetterTrade>>;

    /// Terminal success.
    async fn mark_resolved(&self, trade_key: &str) -> Result<()>;

    /// Record a failed retry: bumps the retry count, schedules the next
    /// attempt with exponential backoff, and flips to ABANDONED once the
    /// attempt budget is spent. Returns the resulting status.
    async fn increment_retry(
        &self,
        trade_key: &str,
        now: DateTime<Utc>,
    ) -> Result<DeadLetterStatus>;

    /// Terminal failure, bypassing the retry schedule entirely.
    async fn abandon(&self, trade_key: &str, notes: &str) -> Result<()>;

    /// Number of items still awaiting a retry (operational visibility).
    async fn pending_count(&self) -> Result<u64>;
}
