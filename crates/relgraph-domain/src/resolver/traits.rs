//! Traits for the reads the resolver needs from its environment.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::DomainResult;
use crate::model::{ObjectRef, Snapshot, Subject, TypeRegistry};

/// Restricts which stored subjects a read returns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SubjectFilter {
    /// Every subject.
    #[default]
    Any,
    /// Only concrete subjects of these types.
    ObjectTypes(Vec<String>),
}

impl SubjectFilter {
    /// Whether a stored subject passes the filter.
    pub fn matches(&self, subject: &Subject) -> bool {
        match self {
            SubjectFilter::Any => true,
            SubjectFilter::ObjectTypes(types) => match subject {
                Subject::Object(object) => types.iter().any(|t| *t == object.object_type),
                _ => false,
            },
        }
    }
}

/// Snapshot-pinned tuple reads needed by the resolver.
///
/// # Contract
///
/// - A read at snapshot `S` never observes writes committed after `S`.
/// - Reading at a snapshot the store has not reached yet, or one it has
///   compacted away, fails with `DomainError::InvalidSnapshot`.
/// - Any other backend failure is `DomainError::StoreUnavailable`; it must
///   never be reported as an empty result.
#[async_trait]
pub trait TupleReader: Send + Sync {
    /// Subjects stored on `(object, relation)` that pass `filter`.
    async fn read_direct(
        &self,
        object: &ObjectRef,
        relation: &str,
        filter: &SubjectFilter,
        snapshot: Snapshot,
    ) -> DomainResult<Vec<Subject>>;

    /// Ids of `object_type` objects holding a tuple `(object, relation, subject)`
    /// for exactly this subject.
    async fn read_by_subject(
        &self,
        object_type: &str,
        relation: &str,
        subject: &Subject,
        snapshot: Snapshot,
    ) -> DomainResult<Vec<String>>;

    /// Ids of every `object_type` object that has at least one tuple.
    ///
    /// Used by ListObjects to enumerate candidates.
    async fn list_object_ids(&self, object_type: &str, snapshot: Snapshot) -> DomainResult<Vec<String>>;
}

/// Access to compiled model versions.
#[async_trait]
pub trait ModelReader: Send + Sync {
    /// Gets a model version by id, or the current one for `None`.
    ///
    /// Fails with `DomainError::ModelNotFound` if no such version exists.
    async fn get_model(&self, model_id: Option<&str>) -> DomainResult<Arc<TypeRegistry>>;
}
