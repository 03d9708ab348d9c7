//! Domain error types for model compilation and query evaluation.

use thiserror::Error;

/// Errors raised while compiling a model description into a type registry.
///
/// Compile errors are fatal at model load time and never surface from
/// queries. Every variant names the declaration that failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// A referenced type is not declared.
    #[error("undefined type '{referenced_type}' referenced in {type_name}#{relation}")]
    UndefinedType {
        type_name: String,
        relation: String,
        referenced_type: String,
    },

    /// A referenced relation is not declared on its type.
    #[error("undefined relation '{referenced_type}#{referenced_relation}' referenced in {type_name}#{relation}")]
    UndefinedRelation {
        type_name: String,
        relation: String,
        referenced_type: String,
        referenced_relation: String,
    },

    /// A rewrite is structurally invalid (bad tupleset, cycle, empty operator...).
    #[error("invalid rewrite in {type_name}#{relation}: {reason}")]
    InvalidRewrite {
        type_name: String,
        relation: String,
        reason: String,
    },

    /// The same type is declared twice.
    #[error("duplicate type definition '{type_name}'")]
    DuplicateType { type_name: String },

    /// The same relation is declared twice on one type.
    #[error("duplicate relation '{relation}' on type '{type_name}'")]
    DuplicateRelation { type_name: String, relation: String },
}

/// Domain-specific errors for evaluation operations.
#[derive(Debug, Clone, Error)]
pub enum DomainError {
    /// Model failed to compile.
    #[error("model compile error: {0}")]
    Compile(#[from] CompileError),

    /// Depth ceiling reached during graph traversal.
    #[error("depth limit exceeded (max: {max_depth})")]
    DepthExceeded { max_depth: u32 },

    /// The query did not finish before its deadline.
    #[error("deadline exceeded after {duration_ms}ms")]
    DeadlineExceeded { duration_ms: u64 },

    /// The tuple store could not serve a read.
    #[error("tuple store unavailable: {message}")]
    StoreUnavailable { message: String },

    /// The requested snapshot cannot be served by the store.
    #[error("invalid snapshot {snapshot}: {message}")]
    InvalidSnapshot { snapshot: u64, message: String },

    /// No model version with this id is registered.
    #[error("model not found: {model_id}")]
    ModelNotFound { model_id: String },

    /// Type not found in the registry.
    #[error("type not found: {type_name}")]
    TypeNotFound { type_name: String },

    /// Relation not found on type.
    #[error("relation '{relation}' not found on type '{type_name}'")]
    RelationNotFound { type_name: String, relation: String },

    /// Invalid object format.
    #[error("invalid object format: {value}")]
    InvalidObjectFormat { value: String },

    /// Invalid subject format.
    #[error("invalid subject format: {value}")]
    InvalidSubjectFormat { value: String },

    /// Invalid relation format.
    #[error("invalid relation format: {value}")]
    InvalidRelationFormat { value: String },
}

impl DomainError {
    /// Whether a caller may reasonably retry the same query.
    ///
    /// Deadline and store failures are transient; everything else is a
    /// property of the request, the model, or the tuple graph.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DomainError::DeadlineExceeded { .. } | DomainError::StoreUnavailable { .. }
        )
    }
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;

/// Result type for model compilation.
pub type CompileResult<T> = Result<T, CompileError>;
