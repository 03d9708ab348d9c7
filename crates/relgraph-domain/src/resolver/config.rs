//! Configuration for the graph resolver.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::QueryCache;

/// Configuration for the graph resolver.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Maximum number of nested (object, relation) steps on one path.
    pub max_depth: u32,
    /// Deadline for a whole query.
    pub timeout: Duration,
    /// Maximum sub-queries evaluated concurrently per fan-out
    /// (userset and tuple-to-userset targets, ListObjects candidates).
    pub max_concurrency: usize,
    /// Whether concurrent identical sub-queries share one computation.
    pub dedup: bool,
    /// Optional memo of sub-query results.
    ///
    /// Requests with contextual tuples bypass both the cache and
    /// in-flight deduplication.
    pub cache: Option<Arc<QueryCache>>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_depth: 25,
            timeout: Duration::from_secs(30),
            max_concurrency: 32,
            dedup: true,
            cache: None,
        }
    }
}

impl ResolverConfig {
    /// Creates a new configuration with caching enabled.
    pub fn with_cache(mut self, cache: Arc<QueryCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Creates a new configuration with the specified max depth.
    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Creates a new configuration with the specified timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the fan-out concurrency bound (at least 1).
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Enables or disables in-flight deduplication.
    pub fn with_dedup(mut self, dedup: bool) -> Self {
        self.dedup = dedup;
        self
    }
}
