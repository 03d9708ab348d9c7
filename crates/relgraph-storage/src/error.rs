//! Storage error types.

use thiserror::Error;

/// Storage-specific errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// The revision has not been committed yet.
    #[error("invalid snapshot {revision}: store head is {head}")]
    InvalidSnapshot { revision: u64, head: u64 },

    /// The revision is older than the compaction horizon.
    #[error("snapshot {revision} expired: history before {oldest} was compacted")]
    SnapshotExpired { revision: u64, oldest: u64 },

    /// Tuple not found.
    #[error("tuple not found: {object_type}:{object_id}#{relation}@{user}")]
    TupleNotFound {
        object_type: String,
        object_id: String,
        relation: String,
        user: String,
    },

    /// Duplicate tuple.
    #[error("duplicate tuple: {object_type}:{object_id}#{relation}@{user}")]
    DuplicateTuple {
        object_type: String,
        object_id: String,
        relation: String,
        user: String,
    },

    /// Invalid input error.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// Internal error.
    #[error("internal storage error: {message}")]
    Internal { message: String },
}

impl StorageError {
    /// Whether the error concerns the requested snapshot rather than the
    /// store's health.
    pub fn is_snapshot_error(&self) -> bool {
        matches!(
            self,
            StorageError::InvalidSnapshot { .. } | StorageError::SnapshotExpired { .. }
        )
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
