//! Dead-letter queue repository implementation.
//!
//! Failed trades land here keyed by their external identifier and are
//! retried on an exponential backoff schedule until RESOLVED or
//! ABANDONED. Terminal rows are retained for audit and excluded from the
//! due-query, so no uniquely-keyed item ever disappears without a
//! queryable terminal status.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tokio::task;
use tracing::warn;
use tradewatch_core::DeadLetterQueue;
use tradewatch_domain::{DeadLetterStatus, DeadLetterTrade, Result, TradewatchError};

use super::manager::{DbConnection, DbManager};
use super::{from_unix, map_join_error, map_sql_error, to_unix};

/// Retry-schedule knobs for the dead-letter queue.
#[derive(Debug, Clone)]
pub struct DlqSettings {
    /// Failed retries allowed before an item is abandoned.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for DlqSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(3600),
        }
    }
}

impl DlqSettings {
    /// Backoff for the retry numbered `attempt` (1-based), capped.
    fn backoff(&self, attempt: u32) -> chrono::Duration {
        let raw = self.base_delay.as_secs_f64() * 2f64.powi(attempt as i32);
        let capped = raw.min(self.max_delay.as_secs_f64());
        chrono::Duration::seconds(capped as i64)
    }
}

/// SQLite-backed [`DeadLetterQueue`].
pub struct SqliteDlqRepository {
    db: Arc<DbManager>,
    settings: DlqSettings,
}

impl SqliteDlqRepository {
    pub fn new(db: Arc<DbManager>, settings: DlqSettings) -> Self {
        Self { db, settings }
    }

    /// Most recent entries regardless of status, for operational tooling.
    pub async fn get_recent(&self, limit: usize) -> Result<Vec<DeadLetterTrade>> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || -> Result<Vec<DeadLetterTrade>> {
            let conn = db.get_connection()?;
            query_recent(&conn, limit).map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }
}

#[async_trait]
impl DeadLetterQueue for SqliteDlqRepository {
    async fn add(
        &self,
        trade_key: &str,
        payload: &serde_json::Value,
        reason: &str,
    ) -> Result<()> {
        let db = Arc::clone(&self.db);
        let trade_key = trade_key.to_string();
        let payload = payload.to_string();
        let reason = reason.to_string();
        let max_attempts = self.settings.max_attempts;

        task::spawn_blocking(move || -> Result<()> {
            let conn = db.get_connection()?;
            insert_or_bump(&conn, &trade_key, &payload, &reason, max_attempts)
                .map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn get_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<DeadLetterTrade>> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || -> Result<Vec<DeadLetterTrade>> {
            let conn = db.get_connection()?;
            query_due(&conn, now, limit).map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn mark_resolved(&self, trade_key: &str) -> Result<()> {
        let db = Arc::clone(&self.db);
        let trade_key = trade_key.to_string();

        task::spawn_blocking(move || -> Result<()> {
            let conn = db.get_connection()?;
            let updated = conn
                .execute(
                    "UPDATE failed_trades
                     SET status = 'RESOLVED', resolved_at = ?1, next_retry_at = NULL
                     WHERE trade_key = ?2",
                    params![to_unix(Utc::now()), trade_key],
                )
                .map_err(map_sql_error)?;
            if updated == 0 {
                warn!(trade_key = %trade_key, "mark_resolved matched no dead-letter row");
            }
            Ok(())
        })
        .await
        .map_err(map_join_error)?
    }

    async fn increment_retry(
        &self,
        trade_key: &str,
        now: DateTime<Utc>,
    ) -> Result<DeadLetterStatus> {
        let db = Arc::clone(&self.db);
        let trade_key = trade_key.to_string();
        let settings = self.settings.clone();

        task::spawn_blocking(move || -> Result<DeadLetterStatus> {
            let conn = db.get_connection()?;
            escalate_retry(&conn, &trade_key, now, &settings)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn abandon(&self, trade_key: &str, notes: &str) -> Result<()> {
        let db = Arc::clone(&self.db);
        let trade_key = trade_key.to_string();
        let notes = notes.to_string();

        task::spawn_blocking(move || -> Result<()> {
            let conn = db.get_connection()?;
            conn.execute(
                "UPDATE failed_trades
                 SET status = 'ABANDONED', resolution_notes = ?1, next_retry_at = NULL
                 WHERE trade_key = ?2",
                params![notes, trade_key],
            )
            .map_err(map_sql_error)?;
            Ok(())
        })
        .await
        .map_err(map_join_error)?
    }

    async fn pending_count(&self) -> Result<u64> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || -> Result<u64> {
            let conn = db.get_connection()?;
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM failed_trades WHERE status IN ('PENDING', 'RETRYING')",
                    [],
                    |row| row.get(0),
                )
                .map_err(map_sql_error)?;
            Ok(count as u64)
        })
        .await
        .map_err(map_join_error)?
    }
}

// ============================================================================
// SQL Operations (synchronous)
// ============================================================================

fn insert_or_bump(
    conn: &DbConnection,
    trade_key: &str,
    payload: &str,
    reason: &str,
    max_attempts: u32,
) -> rusqlite::Result<()> {
    let now = to_unix(Utc::now());
    // A RESOLVED key failing again re-opens with a fresh retry budget;
    // ABANDONED rows stay terminal until an operator intervenes.
    conn.execute(
        "INSERT INTO failed_trades (trade_key, payload, failure_reason, failure_count,
                                    first_failure_at, last_failure_at, retry_count,
                                    max_retries, next_retry_at, status)
         VALUES (?1, ?2, ?3, 1, ?4, ?4, 0, ?5, NULL, 'PENDING')
         ON CONFLICT(trade_key) DO UPDATE SET
             failure_count = failure_count + 1,
             failure_reason = excluded.failure_reason,
             last_failure_at = excluded.last_failure_at,
             retry_count = CASE WHEN status = 'RESOLVED' THEN 0 ELSE retry_count END,
             next_retry_at = CASE WHEN status = 'RESOLVED' THEN NULL ELSE next_retry_at END,
             status = CASE WHEN status = 'RESOLVED' THEN 'PENDING' ELSE status END
         WHERE status != 'ABANDONED'",
        params![trade_key, payload, reason, now, max_attempts],
    )?;
    Ok(())
}

fn query_due(
    conn: &DbConnection,
    now: DateTime<Utc>,
    limit: usize,
) -> rusqlite::Result<Vec<DeadLetterTrade>> {
    let mut stmt = conn.prepare(
        "SELECT trade_key, payload, failure_reason, failure_count, first_failure_at,
                last_failure_at, retry_count, max_retries, next_retry_at, status,
                resolved_at, resolution_notes
         FROM failed_trades
         WHERE status IN ('PENDING', 'RETRYING')
           AND (next_retry_at IS NULL OR next_retry_at <= ?1)
         ORDER BY first_failure_at ASC
         LIMIT ?2",
    )?;

    let rows = stmt.query_map(params![to_unix(now), limit as i64], map_dead_letter_row)?;
    rows.collect()
}

fn query_recent(conn: &DbConnection, limit: usize) -> rusqlite::Result<Vec<DeadLetterTrade>> {
    let mut stmt = conn.prepare(
        "SELECT trade_key, payload, failure_reason, failure_count, first_failure_at,
                last_failure_at, retry_count, max_retries, next_retry_at, status,
                resolved_at, resolution_notes
         FROM failed_trades
         ORDER BY last_failure_at DESC
         LIMIT ?1",
    )?;

    let rows = stmt.query_map(params![limit as i64], map_dead_letter_row)?;
    rows.collect()
}

fn escalate_retry(
    conn: &DbConnection,
    trade_key: &str,
    now: DateTime<Utc>,
    settings: &DlqSettings,
) -> Result<DeadLetterStatus> {
    let current: Option<(u32, u32)> = conn
        .query_row(
            "SELECT retry_count, max_retries FROM failed_trades
             WHERE trade_key = ?1 AND status IN ('PENDING', 'RETRYING')",
            params![trade_key],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(map_sql_error)?;

    let Some((retry_count, max_retries)) = current else {
        return Err(TradewatchError::NotFound(format!(
            "no retryable dead-letter item for key {trade_key}"
        )));
    };

    let attempt = retry_count + 1;
    if attempt >= max_retries {
        conn.execute(
            "UPDATE failed_trades
             SET retry_count = ?1, status = 'ABANDONED', next_retry_at = NULL,
                 last_failure_at = ?2, resolution_notes = 'retry budget exhausted'
             WHERE trade_key = ?3",
            params![attempt, to_unix(now), trade_key],
        )
        .map_err(map_sql_error)?;
        return Ok(DeadLetterStatus::Abandoned);
    }

    let next_retry = now + settings.backoff(attempt);
    conn.execute(
        "UPDATE failed_trades
         SET retry_count = ?1, status = 'RETRYING', next_retry_at = ?2, last_failure_at = ?3
         WHERE trade_key = ?4",
        params![attempt, to_unix(next_retry), to_unix(now), trade_key],
    )
    .map_err(map_sql_error)?;
    Ok(DeadLetterStatus::Retrying)
}

fn map_dead_letter_row(row: &Row<'_>) -> rusqlite::Result<DeadLetterTrade> {
    use std::str::FromStr;

    let status_str: String = row.get(9)?;
    let status = DeadLetterStatus::from_str(&status_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(9, rusqlite::types::Type::Text, e.into())
    })?;

    let payload_str: String = row.get(1)?;
    let payload = serde_json::from_str(&payload_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(DeadLetterTrade {
        trade_key: row.get(0)?,
        payload,
        failure_reason: row.get(2)?,
        failure_count: row.get(3)?,
        first_failure_at: from_unix(row.get(4)?)?,
        last_failure_at: from_unix(row.get(5)?)?,
        retry_count: row.get(6)?,
        max_retries: row.get(7)?,
        next_retry_at: row.get::<_, Option<i64>>(8)?.map(from_unix).transpose()?,
        status,
        resolved_at: row.get::<_, Option<i64>>(10)?.map(from_unix).transpose()?,
        resolution_notes: row.get(11)?,
    })
}

// ============================================================================
// Tests
// ============================================================================
