//! Engine error types.

use thiserror::Error;

use relgraph_domain::error::DomainError;
use relgraph_storage::StorageError;

use crate::config::ConfigLoadError;

/// Errors surfaced by the engine facade.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Query evaluation, model compilation or validation failed.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The tuple store rejected a write or compaction.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Config(#[from] ConfigLoadError),

    /// The batch request is empty.
    #[error("batch request cannot be empty")]
    EmptyBatch,

    /// The batch request exceeds the maximum allowed size.
    #[error("batch size {size} exceeds maximum allowed {max}")]
    BatchTooLarge { size: usize, max: usize },
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
