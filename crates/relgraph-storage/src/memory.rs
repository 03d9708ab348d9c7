//! In-memory, snapshot-versioned tuple storage.
//!
//! Every tuple version records the revision it was created at and, once
//! deleted, the revision it was deleted at. A read at revision `r` sees the
//! versions with `created_at <= r < deleted_at`. Writers are serialized and
//! publish a batch by bumping the head revision after all of its versions
//! are in place, so readers never observe half a batch.

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::error::{StorageError, StorageResult};
use crate::traits::{validate_tuple, StoredTuple, TupleFilter, TupleStore};

/// (object type, object id, relation)
type RelationKey = (String, String, String);

#[derive(Debug, Clone)]
struct TupleVersion {
    tuple: StoredTuple,
    created_at: u64,
    deleted_at: Option<u64>,
}

impl TupleVersion {
    fn visible_at(&self, revision: u64) -> bool {
        self.created_at <= revision && self.deleted_at.map_or(true, |d| d > revision)
    }

    fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// In-memory implementation of TupleStore.
///
/// # Performance Characteristics
///
/// - **Write batch**: O(batch) lookups, serialized across writers
/// - **Read on one (object, relation)**: O(versions of that pair)
/// - **Other reads**: O(N) scan over all versions
///
/// Uses DashMap so readers and the writer only contend per shard.
#[derive(Debug, Default)]
pub struct MemoryTupleStore {
    tuples: DashMap<RelationKey, Vec<TupleVersion>>,
    head: AtomicU64,
    /// Reads below this revision fail with `SnapshotExpired`.
    oldest: AtomicU64,
    writer: Mutex<()>,
}

impl MemoryTupleStore {
    /// Creates a new, empty store at revision 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new store wrapped in Arc.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Oldest revision that can still be read.
    pub fn oldest_readable(&self) -> u64 {
        self.oldest.load(Ordering::SeqCst)
    }

    fn check_revision(&self, revision: u64) -> StorageResult<()> {
        let head = self.head.load(Ordering::SeqCst);
        if revision > head {
            return Err(StorageError::InvalidSnapshot { revision, head });
        }
        let oldest = self.oldest.load(Ordering::SeqCst);
        if revision < oldest {
            return Err(StorageError::SnapshotExpired { revision, oldest });
        }
        Ok(())
    }

    fn key(tuple: &StoredTuple) -> RelationKey {
        (
            tuple.object_type.clone(),
            tuple.object_id.clone(),
            tuple.relation.clone(),
        )
    }

    fn is_live(&self, tuple: &StoredTuple) -> bool {
        self.tuples
            .get(&Self::key(tuple))
            .is_some_and(|versions| versions.iter().any(|v| v.is_live() && v.tuple == *tuple))
    }

    /// Rejects the batch unless every delete hits a live tuple and every
    /// insert lands on a tuple that is not live once the deletes apply.
    fn validate_batch(&self, writes: &[StoredTuple], deletes: &[StoredTuple]) -> StorageResult<()> {
        for tuple in writes.iter().chain(deletes) {
            validate_tuple(tuple)?;
        }

        let mut deleted = HashSet::new();
        for tuple in deletes {
            if !deleted.insert(tuple) || !self.is_live(tuple) {
                return Err(tuple.not_found());
            }
        }

        let mut written = HashSet::new();
        for tuple in writes {
            let live = self.is_live(tuple) && !deleted.contains(tuple);
            if !written.insert(tuple) || live {
                return Err(tuple.duplicate());
            }
        }
        Ok(())
    }

    /// Re-checks the horizon after a read: compaction moves the horizon
    /// before dropping versions, so a read that raced it is reported.
    fn confirm_not_compacted(&self, revision: u64) -> StorageResult<()> {
        let oldest = self.oldest.load(Ordering::SeqCst);
        if revision < oldest {
            return Err(StorageError::SnapshotExpired { revision, oldest });
        }
        Ok(())
    }
}

#[async_trait]
impl TupleStore for MemoryTupleStore {
    #[instrument(skip(self, writes, deletes), fields(writes = writes.len(), deletes = deletes.len()))]
    async fn write(&self, writes: Vec<StoredTuple>, deletes: Vec<StoredTuple>) -> StorageResult<u64> {
        if writes.is_empty() && deletes.is_empty() {
            return Err(StorageError::InvalidInput {
                message: "write batch is empty".to_string(),
            });
        }

        let _writer = self.writer.lock().await;
        self.validate_batch(&writes, &deletes)?;

        let revision = self.head.load(Ordering::SeqCst) + 1;
        for tuple in deletes {
            if let Some(mut versions) = self.tuples.get_mut(&Self::key(&tuple)) {
                if let Some(version) = versions
                    .iter_mut()
                    .find(|v| v.is_live() && v.tuple == tuple)
                {
                    version.deleted_at = Some(revision);
                }
            }
        }
        for tuple in writes {
            self.tuples
                .entry(Self::key(&tuple))
                .or_default()
                .push(TupleVersion {
                    tuple,
                    created_at: revision,
                    deleted_at: None,
                });
        }

        self.head.store(revision, Ordering::SeqCst);
        debug!(revision, "committed write batch");
        Ok(revision)
    }

    async fn read(&self, filter: &TupleFilter, revision: u64) -> StorageResult<Vec<StoredTuple>> {
        self.check_revision(revision)?;

        let visible = |versions: &Vec<TupleVersion>| -> Vec<StoredTuple> {
            versions
                .iter()
                .filter(|v| v.visible_at(revision) && filter.matches(&v.tuple))
                .map(|v| v.tuple.clone())
                .collect()
        };

        let mut tuples = match (&filter.object_type, &filter.object_id, &filter.relation) {
            (Some(object_type), Some(object_id), Some(relation)) => self
                .tuples
                .get(&(object_type.clone(), object_id.clone(), relation.clone()))
                .map(|versions| visible(versions.value()))
                .unwrap_or_default(),
            _ => self
                .tuples
                .iter()
                .flat_map(|entry| visible(entry.value()))
                .collect(),
        };

        self.confirm_not_compacted(revision)?;
        tuples.sort();
        Ok(tuples)
    }

    async fn list_object_ids(&self, object_type: &str, revision: u64) -> StorageResult<Vec<String>> {
        self.check_revision(revision)?;
        let ids: BTreeSet<String> = self
            .tuples
            .iter()
            .filter(|entry| {
                entry.key().0 == object_type && entry.value().iter().any(|v| v.visible_at(revision))
            })
            .map(|entry| entry.key().1.clone())
            .collect();
        self.confirm_not_compacted(revision)?;
        Ok(ids.into_iter().collect())
    }

    async fn head(&self) -> StorageResult<u64> {
        Ok(self.head.load(Ordering::SeqCst))
    }

    #[instrument(skip(self))]
    async fn compact(&self, before: u64) -> StorageResult<usize> {
        let _writer = self.writer.lock().await;
        let head = self.head.load(Ordering::SeqCst);
        if before > head {
            return Err(StorageError::InvalidSnapshot {
                revision: before,
                head,
            });
        }
        if before <= self.oldest.load(Ordering::SeqCst) {
            return Ok(0);
        }
        self.oldest.store(before, Ordering::SeqCst);

        let mut dropped = 0;
        self.tuples.retain(|_, versions| {
            let len = versions.len();
            versions.retain(|v| v.deleted_at.map_or(true, |d| d > before));
            dropped += len - versions.len();
            !versions.is_empty()
        });

        debug!(dropped, oldest = before, "compacted tuple history");
        Ok(dropped)
    }
}
