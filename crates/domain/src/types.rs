//! Core data types owned by the ingestion pipeline.
//!
//! Only two records are persisted by this system: the per-source polling
//! checkpoint and the dead-letter item. Everything else is in-flight data
//! handed to collaborator ports.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single trade observed on the external feed.
///
/// `trade_key` is the feed's unique external identifier (transaction
/// hash); it keys idempotent processing and dead-letter entries. The raw
/// feed record rides along in `payload` so failed items can be replayed
/// without re-fetching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeEvent {
    pub trade_key: String,
    pub wallet: Option<String>,
    pub market_id: Option<String>,
    pub market_title: Option<String>,
    pub side: Option<String>,
    pub price: f64,
    pub size: f64,
    /// `price * size`, the filter dimension for large-trade detection.
    pub notional_usd: f64,
    pub occurred_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

/// Durable progress cursor for one named polling source.
///
/// One row per source, upserted once per cycle, never deleted. The
/// watermark is monotonic non-decreasing and advances only after a batch
/// completed with zero failures.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollCheckpoint {
    pub source_name: String,
    /// Everything at or before this instant is confirmed processed.
    pub watermark: DateTime<Utc>,
    pub total_processed: u64,
    pub total_failures: u64,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Lifecycle of a dead-letter item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeadLetterStatus {
    Pending,
    Retrying,
    Resolved,
    Abandoned,
}

impl DeadLetterStatus {
    /// Terminal states are retained for audit and never retried again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeadLetterStatus::Resolved | DeadLetterStatus::Abandoned)
    }
}

impl fmt::Display for DeadLetterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeadLetterStatus::Pending => "PENDING",
            DeadLetterStatus::Retrying => "RETRYING",
            DeadLetterStatus::Resolved => "RESOLVED",
            DeadLetterStatus::Abandoned => "ABANDONED",
        };
        write!(f, "{s}")
    }
}

impl FromStr for DeadLetterStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(DeadLetterStatus::Pending),
            "RETRYING" => Ok(DeadLetterStatus::Retrying),
            "RESOLVED" => Ok(DeadLetterStatus::Resolved),
            "ABANDONED" => Ok(DeadLetterStatus::Abandoned),
            other => Err(format!("unknown dead-letter status: {other}")),
        }
    }
}

/// A trade whose processing failed, parked for scheduled retries.
///
/// Keyed by the trade's external identifier; re-adding an existing
/// PENDING/RETRYING key bumps `failure_count` instead of duplicating the
/// row. Terminal rows (RESOLVED/ABANDONED) are kept for audit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeadLetterTrade {
    pub trade_key: String,
    /// Snapshot of the original feed record.
    pub payload: serde_json::Value,
    pub failure_reason: String,
    pub failure_count: u32,
    pub first_failure_at: DateTime<Utc>,
    pub last_failure_at: DateTime<Utc>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub status: DeadLetterStatus,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_notes: Option<String>,
}

/// Summary of one completed polling cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub fetched: usize,
    pub processed: usize,
    pub failed: usize,
    pub dead_letters_resolved: usize,
    pub dead_letters_retried: usize,
    pub dead_letters_abandoned: usize,
    pub checkpoint_advanced: bool,
}
