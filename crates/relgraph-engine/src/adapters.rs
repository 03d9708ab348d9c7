//! Adapters that bridge the storage layer to the domain layer.
//!
//! The domain layer (relgraph-domain) reads tuples through `TupleReader`;
//! the storage layer (relgraph-storage) implements `TupleStore`. This module
//! converts between the two tuple representations and maps storage errors
//! onto the domain's error contract.

use std::sync::Arc;

use async_trait::async_trait;

use relgraph_domain::error::{DomainError, DomainResult};
use relgraph_domain::model::{ObjectRef, Snapshot, Subject, Tuple};
use relgraph_domain::resolver::{SubjectFilter, TupleReader};
use relgraph_storage::{StorageError, StoredTuple, TupleFilter, TupleStore, WILDCARD_ID};

/// Adapter that implements `TupleReader` over a `TupleStore`.
pub struct StoreTupleReader<S: TupleStore> {
    storage: Arc<S>,
}

impl<S: TupleStore> StoreTupleReader<S> {
    /// Creates a new adapter wrapping the given storage.
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    async fn read(&self, filter: &TupleFilter, snapshot: Snapshot) -> DomainResult<Vec<StoredTuple>> {
        self.storage
            .read(filter, snapshot.revision())
            .await
            .map_err(|e| map_storage_error(e, snapshot))
    }
}

#[async_trait]
impl<S: TupleStore> TupleReader for StoreTupleReader<S> {
    async fn read_direct(
        &self,
        object: &ObjectRef,
        relation: &str,
        filter: &SubjectFilter,
        snapshot: Snapshot,
    ) -> DomainResult<Vec<Subject>> {
        let mut tuple_filter =
            TupleFilter::object_relation(&object.object_type, &object.object_id, relation);
        if let SubjectFilter::ObjectTypes(types) = filter {
            tuple_filter = tuple_filter.with_user_types(types.clone());
        }

        let tuples = self.read(&tuple_filter, snapshot).await?;
        Ok(tuples.into_iter().map(stored_subject).collect())
    }

    async fn read_by_subject(
        &self,
        object_type: &str,
        relation: &str,
        subject: &Subject,
        snapshot: Snapshot,
    ) -> DomainResult<Vec<String>> {
        let filter = TupleFilter {
            object_type: Some(object_type.to_string()),
            relation: Some(relation.to_string()),
            ..TupleFilter::default()
        }
        .with_user(subject.to_string());

        let tuples = self.read(&filter, snapshot).await?;
        let mut ids: Vec<String> = tuples.into_iter().map(|t| t.object_id).collect();
        ids.dedup();
        Ok(ids)
    }

    async fn list_object_ids(&self, object_type: &str, snapshot: Snapshot) -> DomainResult<Vec<String>> {
        self.storage
            .list_object_ids(object_type, snapshot.revision())
            .await
            .map_err(|e| map_storage_error(e, snapshot))
    }
}

/// Maps a storage failure onto the domain contract.
///
/// Snapshot failures stay distinguishable; everything else means the store
/// could not answer, which must never read as "no tuples".
pub fn map_storage_error(err: StorageError, snapshot: Snapshot) -> DomainError {
    if err.is_snapshot_error() {
        DomainError::InvalidSnapshot {
            snapshot: snapshot.revision(),
            message: err.to_string(),
        }
    } else {
        DomainError::StoreUnavailable {
            message: err.to_string(),
        }
    }
}

/// Converts a domain tuple into its stored form.
pub fn to_stored(tuple: &Tuple) -> StoredTuple {
    let object = &tuple.object;
    match &tuple.subject {
        Subject::Object(subject) => StoredTuple::new(
            &object.object_type,
            &object.object_id,
            &tuple.relation,
            &subject.object_type,
            &subject.object_id,
        ),
        Subject::Userset {
            object: subject,
            relation,
        } => StoredTuple::new(
            &object.object_type,
            &object.object_id,
            &tuple.relation,
            &subject.object_type,
            &subject.object_id,
        )
        .with_user_relation(relation),
        Subject::Wildcard { subject_type } => StoredTuple::new(
            &object.object_type,
            &object.object_id,
            &tuple.relation,
            subject_type,
            WILDCARD_ID,
        ),
    }
}

fn stored_subject(tuple: StoredTuple) -> Subject {
    match tuple.user_relation {
        Some(relation) => Subject::userset(tuple.user_type, tuple.user_id, relation),
        None if tuple.user_id == WILDCARD_ID => Subject::wildcard(tuple.user_type),
        None => Subject::object(tuple.user_type, tuple.user_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relgraph_storage::MemoryTupleStore;

    fn tuple(object: &str, relation: &str, subject: &str) -> Tuple {
        Tuple::parse(object, relation, subject).unwrap()
    }

    #[test]
    fn test_subject_forms_survive_storage() {
        for subject in ["user:alice", "domain:acme#member", "user:*"] {
            let stored = to_stored(&tuple("document:doc1", "viewer", subject));
            assert_eq!(stored.user(), subject);
            assert_eq!(stored_subject(stored).to_string(), subject);
        }
    }

    #[tokio::test]
    async fn test_read_direct_applies_subject_type_filter() {
        let store = MemoryTupleStore::new_shared();
        let revision = store
            .write(
                vec![
                    to_stored(&tuple("document:doc1", "parent", "folder:root")),
                    to_stored(&tuple("document:doc1", "parent", "folder:*")),
                    to_stored(&tuple("document:doc1", "parent", "group:eng#member")),
                ],
                vec![],
            )
            .await
            .unwrap();
        let reader = StoreTupleReader::new(store);

        let subjects = reader
            .read_direct(
                &ObjectRef::new("document", "doc1"),
                "parent",
                &SubjectFilter::ObjectTypes(vec!["folder".to_string()]),
                Snapshot::new(revision),
            )
            .await
            .unwrap();
        assert_eq!(subjects, vec![Subject::object("folder", "root")]);

        let all = reader
            .read_direct(
                &ObjectRef::new("document", "doc1"),
                "parent",
                &SubjectFilter::Any,
                Snapshot::new(revision),
            )
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_read_by_subject_matches_exact_subject() {
        let store = MemoryTupleStore::new_shared();
        let revision = store
            .write(
                vec![
                    to_stored(&tuple("document:a", "viewer", "user:alice")),
                    to_stored(&tuple("document:b", "viewer", "user:*")),
                    to_stored(&tuple("document:c", "editor", "user:alice")),
                ],
                vec![],
            )
            .await
            .unwrap();
        let reader = StoreTupleReader::new(store);

        let ids = reader
            .read_by_subject("document", "viewer", &Subject::object("user", "alice"), Snapshot::new(revision))
            .await
            .unwrap();
        assert_eq!(ids, vec!["a"]);

        let ids = reader
            .read_by_subject("document", "viewer", &Subject::wildcard("user"), Snapshot::new(revision))
            .await
            .unwrap();
        assert_eq!(ids, vec!["b"]);
    }

    #[tokio::test]
    async fn test_future_snapshot_is_invalid_snapshot() {
        let reader = StoreTupleReader::new(MemoryTupleStore::new_shared());
        let result = reader
            .read_direct(
                &ObjectRef::new("document", "doc1"),
                "viewer",
                &SubjectFilter::Any,
                Snapshot::new(7),
            )
            .await;
        assert!(matches!(result, Err(DomainError::InvalidSnapshot { snapshot: 7, .. })));
    }

    #[test]
    fn test_internal_failure_is_store_unavailable() {
        let err = map_storage_error(
            StorageError::Internal {
                message: "disk".to_string(),
            },
            Snapshot::new(1),
        );
        assert!(matches!(err, DomainError::StoreUnavailable { .. }));
    }
}
