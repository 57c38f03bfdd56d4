//! Error types for the revsync engine.

use crate::storage::{FailureKind, StorageError};
use crate::{PrimaryKey, TableName};
use thiserror::Error;

/// All possible errors from the revsync engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    // Protocol errors
    #[error("table is not synchronized: {0}")]
    TableNotSynchronized(TableName),

    #[error("unknown columns for table '{table}': {columns:?}")]
    UnknownColumns {
        table: TableName,
        columns: Vec<String>,
    },

    #[error("sync strategy mismatch for table '{table}': local {local}, remote {remote}")]
    StrategyMismatch {
        table: TableName,
        local: String,
        remote: String,
    },

    #[error("protocol error: {0}")]
    Protocol(String),

    // Storage outcomes surfaced to the caller
    #[error("{operation} failed after {attempts} attempts, 0 retries remaining")]
    RetriesExhausted {
        operation: &'static str,
        attempts: u32,
    },

    #[error("entry not unique in table '{table}': {primary_key}")]
    EntryNotUnique {
        table: TableName,
        primary_key: PrimaryKey,
    },

    #[error("apply failed: {0}")]
    ApplyFailed(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    // Defects
    #[error("internal defect: {0}")]
    InternalDefect(String),
}

impl Error {
    /// Whether the whole call may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Storage(e) if e.kind == FailureKind::Transient)
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::TableNotSynchronized("users".into());
        assert_eq!(err.to_string(), "table is not synchronized: users");

        let err = Error::RetriesExhausted {
            operation: "applyChanges",
            attempts: 4,
        };
        assert_eq!(
            err.to_string(),
            "applyChanges failed after 4 attempts, 0 retries remaining"
        );

        let err = Error::EntryNotUnique {
            table: "items".into(),
            primary_key: PrimaryKey::Int(5),
        };
        assert_eq!(err.to_string(), "entry not unique in table 'items': 5");
    }

    #[test]
    fn only_transient_storage_errors_retry() {
        assert!(Error::Storage(StorageError::transient("serialization failure")).is_transient());
        assert!(!Error::Storage(StorageError::uniqueness("dup")).is_transient());
        assert!(!Error::ApplyFailed("boom".into()).is_transient());
    }
}
