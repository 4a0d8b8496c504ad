//! Error types used throughout the application

use thiserror::Error;

/// Main error type for tradewatch
#[derive(Error, Debug)]
pub enum TradewatchError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for tradewatch operations
pub type Result<T> = std::result::Result<T, TradewatchError>;

/// Outcome classification for item processing.
///
/// A `Transient` failure goes onto the dead-letter retry schedule; a
/// `Permanent` failure can never succeed and is routed straight to the
/// ABANDONED terminal state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    #[error("transient processing failure: {0}")]
    Transient(String),

    #[error("permanent processing failure: {0}")]
    Permanent(String),
}

impl ProcessError {
    /// True when the item is worth re-attempting later.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProcessError::Transient(_))
    }
}
