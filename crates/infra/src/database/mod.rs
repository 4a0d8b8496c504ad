//! SQLite persistence for the two records the ingestion core owns.

pub mod checkpoint_repository;
pub mod dlq_repository;
pub mod manager;

pub use checkpoint_repository::SqliteCheckpointRepository;
pub use dlq_repository::{DlqSettings, SqliteDlqRepository};
pub use manager::DbManager;

use chrono::{DateTime, TimeZone, Utc};
use tradewatch_domain::TradewatchError;

/// Unix seconds for storage; the schema keeps all timestamps as INTEGER.
pub(crate) fn to_unix(ts: DateTime<Utc>) -> i64 {
    ts.timestamp()
}

pub(crate) fn from_unix(secs: i64) -> Result<DateTime<Utc>, rusqlite::Error> {
    Utc.timestamp_opt(secs, 0).single().ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Integer,
            format!("timestamp out of range: {secs}").into(),
        )
    })
}

pub(crate) fn map_sql_error(err: rusqlite::Error) -> TradewatchError {
    TradewatchError::Database(err.to_string())
}

pub(crate) fn map_join_error(err: tokio::task::JoinError) -> TradewatchError {
    if err.is_cancelled() {
        TradewatchError::Internal("blocking task cancelled".into())
    } else {
        TradewatchError::Internal(format!("blocking task failed: {err}"))
    }
}
