//! Error types for the store module.

use custody_core::{CoreError, Digest, GroupId};
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O error from the blob store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Entry or object could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// No blob with this digest.
    #[error("object not found: {0}")]
    NotFound(Digest),

    /// Invalid data in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// A stored ledger row no longer decodes into an entry.
    #[error("corrupt ledger row at seq {seq}: {reason}")]
    Corrupt { seq: u64, reason: String },

    /// The stored row of a sealed group cannot be rewritten or removed.
    #[error("group {0} is sealed in storage")]
    GroupFrozen(GroupId),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// An in-process lock was poisoned by a panicking holder.
    #[error("lock poisoned: {0}")]
    Poisoned(String),

    /// A blocking task panicked or was cancelled.
    #[error("storage task failed: {0}")]
    Task(String),
}

impl StoreError {
    /// Whether retrying the operation may succeed: I/O failures and SQLite
    /// busy or locked conditions.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Io(e) => !matches!(
                e.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::InvalidData
            ),
            StoreError::Database(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

impl From<CoreError> for StoreError {
    fn from(e: CoreError) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(e: tokio::task::JoinError) -> Self {
        StoreError::Task(e.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        StoreError::Poisoned(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let busy = StoreError::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ));
        assert!(busy.is_transient());

        let disk = StoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
        assert!(disk.is_transient());

        let missing = StoreError::Io(std::io::ErrorKind::NotFound.into());
        assert!(!missing.is_transient());

        assert!(!StoreError::InvalidData("bad".into()).is_transient());
        assert!(!StoreError::Corrupt { seq: 4, reason: "bad kind".into() }.is_transient());
        assert!(!StoreError::NotFound(Digest::GENESIS).is_transient());
    }
}
