//! Query result memoization and in-flight deduplication.
//!
//! Sub-query results are cached in a bounded Moka cache with LRU eviction.
//! Keys carry the model id and the snapshot, so an entry can never be
//! served to a query pinned to another model version or another point in
//! time; entries only leave the cache through eviction, TTL or explicit
//! invalidation after compaction.
//!
//! Invalidating before a snapshot also raises a horizon: keys below it are
//! neither stored nor served afterwards, so a query that started before
//! compaction cannot repopulate an expired snapshot.
//!
//! # Key Design
//!
//! `(model_id, snapshot, object, relation, subject)` where `subject` is
//! `None` for expansions.
//!
//! # What gets stored
//!
//! Only successful, path-independent results are inserted: the evaluator
//! never caches errors or results that were decided by cutting a cycle on
//! the current path. Every value records the height of the sub-traversal
//! that produced it so a reuser can check it still fits under the depth
//! ceiling.
//!
//! # Example
//!
//! ```rust,ignore
//! use relgraph_domain::cache::{CacheKey, CachedValue, QueryCache, QueryCacheConfig};
//!
//! let cache = QueryCache::new(QueryCacheConfig::default());
//! cache.insert(key.clone(), CachedValue::Check { allowed: true, height: 2 }).await;
//! assert!(cache.get(&key).await.is_some());
//! ```

mod singleflight;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use moka::policy::EvictionPolicy;

use crate::model::{ObjectRef, Snapshot, Subject};
use crate::resolver::ExpandNode;

pub use singleflight::{Singleflight, SingleflightGuard, SingleflightSlot};

/// Configuration for the query cache.
#[derive(Debug, Clone)]
pub struct QueryCacheConfig {
    /// Whether memoization is enabled.
    pub enabled: bool,
    /// Maximum number of entries in the cache.
    pub max_capacity: u64,
    /// Time-to-live for cache entries.
    pub ttl: Duration,
}

impl Default for QueryCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_capacity: 100_000,
            ttl: Duration::from_secs(300),
        }
    }
}

impl QueryCacheConfig {
    /// Enables or disables caching.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the maximum capacity.
    pub fn with_max_capacity(mut self, max_capacity: u64) -> Self {
        self.max_capacity = max_capacity;
        self
    }

    /// Sets the TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

/// Cache key that uniquely identifies a sub-query.
///
/// The derived ordering is the lock order used by in-flight deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    /// Model version the query was evaluated against.
    pub model_id: Arc<str>,
    /// Snapshot the query read at.
    pub snapshot: Snapshot,
    /// The object being evaluated.
    pub object: ObjectRef,
    /// The relation being evaluated.
    pub relation: String,
    /// The subject being checked, or `None` for an expansion.
    pub subject: Option<Subject>,
}

impl CacheKey {
    /// Creates a new cache key.
    pub fn new(
        model_id: Arc<str>,
        snapshot: Snapshot,
        object: ObjectRef,
        relation: impl Into<String>,
        subject: Option<Subject>,
    ) -> Self {
        Self {
            model_id,
            snapshot,
            object,
            relation: relation.into(),
            subject,
        }
    }
}

/// A memoized sub-query result.
#[derive(Debug, Clone)]
pub enum CachedValue {
    /// Outcome of a check step.
    Check { allowed: bool, height: u32 },
    /// Outcome of a recursive expansion step.
    Expand { node: Arc<ExpandNode>, height: u32 },
}

impl CachedValue {
    /// Number of nested evaluation steps the result depended on,
    /// including its own.
    pub fn height(&self) -> u32 {
        match self {
            CachedValue::Check { height, .. } | CachedValue::Expand { height, .. } => *height,
        }
    }

    /// Whether the value can be reused by a caller at `depth`.
    pub fn fits(&self, depth: u32, max_depth: u32) -> bool {
        depth.saturating_add(self.height()) <= max_depth
    }
}

/// Hit/miss counters for a cache instance.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    /// Number of lookups answered from the cache.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Number of lookups that missed.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// hits / (hits + misses), or 0.0 before any lookup.
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

/// Bounded, concurrent memo of sub-query results.
///
/// # Thread Safety
///
/// Fully thread-safe; share it behind `Arc` across resolvers and tasks.
pub struct QueryCache {
    cache: Cache<CacheKey, CachedValue>,
    config: QueryCacheConfig,
    stats: CacheStats,
    /// Snapshots below this revision are expired.
    horizon: AtomicU64,
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("config", &self.config)
            .field("entry_count", &self.cache.entry_count())
            .finish()
    }
}

impl QueryCache {
    /// Creates a new cache with the given configuration.
    pub fn new(config: QueryCacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_capacity)
            .time_to_live(config.ttl)
            .eviction_policy(EvictionPolicy::lru())
            .build();

        Self {
            cache,
            config,
            stats: CacheStats::default(),
            horizon: AtomicU64::new(0),
        }
    }

    /// Returns the configuration for this cache.
    pub fn config(&self) -> &QueryCacheConfig {
        &self.config
    }

    /// Returns whether caching is enabled.
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Hit/miss counters.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Whether `snapshot` lies below the invalidation horizon.
    pub fn is_expired(&self, snapshot: Snapshot) -> bool {
        snapshot.revision() < self.horizon.load(Ordering::Acquire)
    }

    /// Inserts a result. Keys below the horizon are dropped.
    pub async fn insert(&self, key: CacheKey, value: CachedValue) {
        if self.config.enabled && !self.is_expired(key.snapshot) {
            self.cache.insert(key, value).await;
        }
    }

    /// Retrieves a cached result.
    ///
    /// # Metrics
    ///
    /// Records `relgraph_cache_hits_total` / `relgraph_cache_misses_total`.
    pub async fn get(&self, key: &CacheKey) -> Option<CachedValue> {
        if !self.config.enabled || self.is_expired(key.snapshot) {
            return None;
        }
        let result = self.cache.get(key).await;
        if result.is_some() {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("relgraph_cache_hits_total").increment(1);
        } else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("relgraph_cache_misses_total").increment(1);
        }
        result
    }

    /// Invalidates a single entry.
    pub async fn invalidate(&self, key: &CacheKey) {
        self.cache.invalidate(key).await;
    }

    /// Invalidates entries matching a predicate.
    pub async fn invalidate_matching<F>(&self, predicate: F)
    where
        F: Fn(&CacheKey) -> bool,
    {
        self.cache.run_pending_tasks().await;

        let keys_to_remove: Vec<CacheKey> = self
            .cache
            .iter()
            .filter(|(k, _)| predicate(k.as_ref()))
            .map(|(k, _)| (*k).clone())
            .collect();

        for key in keys_to_remove {
            self.cache.invalidate(&key).await;
        }
    }

    /// Drops every entry read at a snapshot older than `before` and refuses
    /// such entries from now on.
    pub async fn invalidate_before(&self, before: Snapshot) {
        self.horizon.fetch_max(before.revision(), Ordering::AcqRel);
        self.invalidate_matching(|key| key.snapshot < before).await;
    }

    /// Drops every entry of one model version.
    pub async fn invalidate_model(&self, model_id: &str) {
        self.invalidate_matching(|key| &*key.model_id == model_id)
            .await;
    }

    /// Returns the approximate number of entries in the cache.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Runs pending maintenance tasks (evictions, expirations).
    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }
}

/// Registers query cache metric descriptions.
///
/// Call once during startup; optional.
pub fn register_query_cache_metrics() {
    metrics::describe_counter!(
        "relgraph_cache_hits_total",
        "Total number of query cache hits"
    );
    metrics::describe_counter!(
        "relgraph_cache_misses_total",
        "Total number of query cache misses"
    );
}
