//! Checkpoint repository implementation.
//!
//! One upserted row per named source keyed by `source_name`. The watermark
//! guard takes `MAX(existing, new)` so an accidental concurrent writer
//! cannot regress it; counters are not protected the same way, which is
//! why a single active writer per source remains the documented operating
//! assumption.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tokio::task;
use tradewatch_core::CheckpointStore;
use tradewatch_domain::{PollCheckpoint, Result};

use super::manager::{DbConnection, DbManager};
use super::{from_unix, map_join_error, map_sql_error, to_unix};

/// SQLite-backed [`CheckpointStore`].
pub struct SqliteCheckpointRepository {
    db: Arc<DbManager>,
}

impl SqliteCheckpointRepository {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointRepository {
    async fn get(&self, source_name: &str) -> Result<Option<PollCheckpoint>> {
        let db = Arc::clone(&self.db);
        let source_name = source_name.to_string();

        task::spawn_blocking(move || -> Result<Option<PollCheckpoint>> {
            let conn = db.get_connection()?;
            query_checkpoint(&conn, &source_name).map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn save(
        &self,
        source_name: &str,
        watermark: DateTime<Utc>,
        processed_in_batch: u64,
    ) -> Result<()> {
        let db = Arc::clone(&self.db);
        let source_name = source_name.to_string();

        task::spawn_blocking(move || -> Result<()> {
            let conn = db.get_connection()?;
            upsert_watermark(&conn, &source_name, watermark, processed_in_batch)
                .map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn record_failure(
        &self,
        source_name: &str,
        watermark: DateTime<Utc>,
        reason: &str,
        failed_in_batch: u64,
    ) -> Result<()> {
        let db = Arc::clone(&self.db);
        let source_name = source_name.to_string();
        let reason = reason.to_string();

        task::spawn_blocking(move || -> Result<()> {
            let conn = db.get_connection()?;
            upsert_failure(&conn, &source_name, watermark, &reason, failed_in_batch)
                .map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }
}

// ============================================================================
// SQL Operations (synchronous)
// ============================================================================

fn query_checkpoint(
    conn: &DbConnection,
    source_name: &str,
) -> rusqlite::Result<Option<PollCheckpoint>> {
    conn.query_row(
        "SELECT source_name, last_checkpoint_time, total_processed, total_failures,
                last_failure_time, last_failure_reason, created_at, updated_at
         FROM monitor_checkpoints
         WHERE source_name = ?1",
        params![source_name],
        map_checkpoint_row,
    )
    .optional()
}

fn upsert_watermark(
    conn: &DbConnection,
    source_name: &str,
    watermark: DateTime<Utc>,
    processed: u64,
) -> rusqlite::Result<()> {
    let now = to_unix(Utc::now());
    conn.execute(
        "INSERT INTO monitor_checkpoints (source_name, last_checkpoint_time, total_processed,
                                          total_failures, created_at, updated_at)
         VALUES (?1, ?2, ?3, 0, ?4, ?4)
         ON CONFLICT(source_name) DO UPDATE SET
             last_checkpoint_time = MAX(last_checkpoint_time, excluded.last_checkpoint_time),
             total_processed = total_processed + excluded.total_processed,
             updated_at = excluded.updated_at",
        params![source_name, to_unix(watermark), processed as i64, now],
    )?;
    Ok(())
}

fn upsert_failure(
    conn: &DbConnection,
    source_name: &str,
    watermark: DateTime<Utc>,
    reason: &str,
    failed: u64,
) -> rusqlite::Result<()> {
    let now = to_unix(Utc::now());
    // The watermark column only takes the caller's value on first insert;
    // an existing cursor is never moved by a failure.
    conn.execute(
        "INSERT INTO monitor_checkpoints (source_name, last_checkpoint_time, total_processed,
                                          total_failures, last_failure_time, last_failure_reason,
                                          created_at, updated_at)
         VALUES (?1, ?2, 0, ?3, ?4, ?5, ?4, ?4)
         ON CONFLICT(source_name) DO UPDATE SET
             total_failures = total_failures + excluded.total_failures,
             last_failure_time = excluded.last_failure_time,
             last_failure_reason = excluded.last_failure_reason,
             updated_at = excluded.updated_at",
        params![source_name, to_unix(watermark), failed as i64, now, reason],
    )?;
    Ok(())
}

fn map_checkpoint_row(row: &Row<'_>) -> rusqlite::Result<PollCheckpoint> {
    Ok(PollCheckpoint {
        source_name: row.get(0)?,
        watermark: from_unix(row.get(1)?)?,
        total_processed: row.get::<_, i64>(2)? as u64,
        total_failures: row.get::<_, i64>(3)? as u64,
        last_failure_at: row.get::<_, Option<i64>>(4)?.map(from_unix).transpose()?,
        last_failure_reason: row.get(5)?,
        created_at: from_unix(row.get(6)?)?,
        updated_at: from_unix(row.get(7)?)?,
    })
}

// ============================================================================
// Tests
// ============================================================================
