//! Store error types.

use thiserror::Error;

/// Errors opening or migrating a durable store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The on-disk schema version does not match this build.
    #[error("schema version mismatch in {database}: found {found}, expected {expected}")]
    VersionMismatch {
        /// Database name.
        database: &'static str,
        /// Version found in the meta table.
        found: i64,
        /// Version this build requires.
        expected: i64,
    },

    /// SQLite failure.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A persisted value could not be decoded.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
