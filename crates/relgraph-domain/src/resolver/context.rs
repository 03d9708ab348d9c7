//! Internal traversal state for the graph resolver.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::cache::CacheKey;
use crate::model::{ObjectRef, Snapshot, Subject, Tuple, TypeRegistry};

use super::types::ResolutionMetadata;

/// An (object, relation) pair on the current path.
pub(crate) type NodeKey = (ObjectRef, String);

/// Per-path context, cloned into every child evaluation.
#[derive(Debug, Clone)]
pub(crate) struct TraversalContext {
    /// Number of (object, relation) steps above the current one.
    pub(crate) depth: u32,
    /// Pairs on the current path, for cycle detection.
    /// Wrapped in Arc for cheap cloning when not mutating.
    pub(crate) visited: Arc<HashSet<NodeKey>>,
    /// Largest in-flight key led by this path. A path may only wait on
    /// flights ordered strictly after it.
    pub(crate) max_flight: Option<Arc<CacheKey>>,
}

impl TraversalContext {
    pub(crate) fn new() -> Self {
        Self {
            depth: 0,
            visited: Arc::new(HashSet::new()),
            max_flight: None,
        }
    }

    /// Context for the children of a step on `node`.
    pub(crate) fn enter(&self, node: NodeKey, led: Option<&CacheKey>) -> Self {
        // Clone the inner HashSet only when adding new entries (copy-on-write)
        let mut visited = (*self.visited).clone();
        visited.insert(node);

        let max_flight = match (led, &self.max_flight) {
            (Some(key), Some(current)) if key <= current.as_ref() => Some(Arc::clone(current)),
            (Some(key), _) => Some(Arc::new(key.clone())),
            (None, current) => current.clone(),
        };

        Self {
            depth: self.depth + 1,
            visited: Arc::new(visited),
            max_flight,
        }
    }

    pub(crate) fn is_visited(&self, object: &ObjectRef, relation: &str) -> bool {
        self.visited
            .contains(&(object.clone(), relation.to_string()))
    }

    /// Whether this path may wait on a flight for `key` without risking a
    /// wait cycle.
    pub(crate) fn may_wait_on(&self, key: &CacheKey) -> bool {
        self.max_flight
            .as_deref()
            .map_or(true, |led| key > led)
    }
}

/// Query-wide state shared by every step of one query.
pub(crate) struct QueryScope {
    pub(crate) registry: Arc<TypeRegistry>,
    pub(crate) model_id: Arc<str>,
    pub(crate) snapshot: Snapshot,
    /// The subject being checked; `None` for expansions.
    pub(crate) subject: Option<Subject>,
    pub(crate) contextual_tuples: Arc<Vec<Tuple>>,
    pub(crate) stats: QueryStats,
}

impl QueryScope {
    pub(crate) fn new(
        registry: Arc<TypeRegistry>,
        snapshot: Snapshot,
        subject: Option<Subject>,
        contextual_tuples: Arc<Vec<Tuple>>,
    ) -> Self {
        let model_id = Arc::from(registry.model_id());
        Self {
            registry,
            model_id,
            snapshot,
            subject,
            contextual_tuples,
            stats: QueryStats::default(),
        }
    }

    /// Results of this query may be cached and shared with other queries.
    pub(crate) fn shareable(&self) -> bool {
        self.contextual_tuples.is_empty()
    }

    pub(crate) fn key(&self, object: &ObjectRef, relation: &str) -> CacheKey {
        CacheKey::new(
            Arc::clone(&self.model_id),
            self.snapshot,
            object.clone(),
            relation,
            self.subject.clone(),
        )
    }

    /// Contextual tuples stored on `(object, relation)`.
    pub(crate) fn contextual_subjects<'a>(
        &'a self,
        object: &'a ObjectRef,
        relation: &'a str,
    ) -> impl Iterator<Item = &'a Subject> + 'a {
        self.contextual_tuples
            .iter()
            .filter(move |t| &t.object == object && t.relation == relation)
            .map(|t| &t.subject)
    }
}

/// Per-query counters, updated concurrently by every step.
#[derive(Debug, Default)]
pub(crate) struct QueryStats {
    depth: AtomicU32,
    datastore_reads: AtomicU64,
    cache_hits: AtomicU64,
    dedup_joins: AtomicU64,
    cycle_detected: AtomicBool,
}

impl QueryStats {
    pub(crate) fn reached(&self, depth: u32) {
        self.depth.fetch_max(depth, Ordering::Relaxed);
    }

    pub(crate) fn record_read(&self) {
        self.datastore_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dedup_join(&self) {
        self.dedup_joins.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cycle(&self) {
        self.cycle_detected.store(true, Ordering::Relaxed);
    }

    pub(crate) fn metadata(&self) -> ResolutionMetadata {
        ResolutionMetadata {
            depth: self.depth.load(Ordering::Relaxed),
            datastore_reads: self.datastore_reads.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            dedup_joins: self.dedup_joins.load(Ordering::Relaxed),
            cycle_detected: self.cycle_detected.load(Ordering::Relaxed),
        }
    }
}
