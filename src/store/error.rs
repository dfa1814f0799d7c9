//! Index & run store errors.

use thiserror::Error;

/// SQLite-backed index, delivery-retry, and run-history errors
/// (`spec.md` §7 `StorageError`, the SQLite half).
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("background task panicked: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    #[error("row not found")]
    NotFound,
}
