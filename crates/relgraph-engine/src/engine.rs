//! The engine facade.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, instrument};

use relgraph_domain::cache::{register_query_cache_metrics, QueryCache};
use relgraph_domain::model::{ModelDescription, Snapshot, Tuple, TypeRegistry};
use relgraph_domain::resolver::{
    CheckRequest, CheckResult, ExpandRequest, ExpandResult, GraphResolver, ListObjectsRequest,
    ListObjectsResult, ModelReader,
};
use relgraph_storage::{MemoryTupleStore, TupleStore};

use crate::adapters::{to_stored, StoreTupleReader};
use crate::batch::{self, BatchCheckRequest, BatchCheckResponse};
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::observability::init_logging;
use crate::registry::ModelRegistry;

/// Wires a tuple store, the model registry and the evaluator together.
///
/// Every query names its snapshot explicitly; take one from [`Engine::write`]
/// or [`Engine::head`].
pub struct Engine<S: TupleStore = MemoryTupleStore> {
    store: Arc<S>,
    models: Arc<ModelRegistry>,
    cache: Option<Arc<QueryCache>>,
    resolver: GraphResolver<StoreTupleReader<S>, ModelRegistry>,
}

impl Engine<MemoryTupleStore> {
    /// An engine over a fresh in-memory store.
    pub fn in_memory(config: &EngineConfig) -> Self {
        Self::new(MemoryTupleStore::new_shared(), config)
    }

    /// Process entry point: loads configuration from `config_path` (or the
    /// environment alone), installs logging, registers cache metrics and
    /// starts an in-memory engine.
    ///
    /// Logging is left alone if the host already installed a subscriber.
    pub fn bootstrap(config_path: Option<&Path>) -> EngineResult<(Self, EngineConfig)> {
        let config = match config_path {
            Some(path) => EngineConfig::load(path)?,
            None => EngineConfig::from_env()?,
        };
        if !init_logging(config.logging_config()) {
            info!("global subscriber already installed");
        }
        if config.cache.enabled {
            register_query_cache_metrics();
        }
        info!(
            max_depth = config.resolver.max_depth,
            cache = config.cache.enabled,
            "engine starting"
        );
        Ok((Self::in_memory(&config), config))
    }
}

impl<S: TupleStore> Engine<S> {
    pub fn new(store: Arc<S>, config: &EngineConfig) -> Self {
        let models = Arc::new(ModelRegistry::new());
        let mut resolver_config = config.resolver_config();
        let cache = config
            .cache
            .enabled
            .then(|| Arc::new(QueryCache::new(config.cache_config())));
        if let Some(cache) = &cache {
            resolver_config = resolver_config.with_cache(Arc::clone(cache));
        }

        let resolver = GraphResolver::with_config(
            Arc::new(StoreTupleReader::new(Arc::clone(&store))),
            Arc::clone(&models),
            resolver_config,
        );

        Self {
            store,
            models,
            cache,
            resolver,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    pub fn cache(&self) -> Option<&Arc<QueryCache>> {
        self.cache.as_ref()
    }

    /// Compiles a model and makes it current.
    pub async fn load_model(&self, model: &ModelDescription) -> EngineResult<Arc<TypeRegistry>> {
        Ok(self.models.load(model).await?)
    }

    /// Makes a previously loaded model version current.
    pub async fn activate_model(&self, model_id: &str) -> EngineResult<()> {
        Ok(self.models.activate(model_id).await?)
    }

    /// Atomically applies tuple inserts and deletes.
    ///
    /// Inserted tuples are validated against the current model. Returns the
    /// snapshot at which the batch became visible.
    #[instrument(skip_all, fields(writes = writes.len(), deletes = deletes.len()))]
    pub async fn write(&self, writes: Vec<Tuple>, deletes: Vec<Tuple>) -> EngineResult<Snapshot> {
        let registry = self.models.get_model(None).await?;
        for tuple in &writes {
            registry.validate_tuple(tuple)?;
        }

        let revision = self
            .store
            .write(
                writes.iter().map(to_stored).collect(),
                deletes.iter().map(to_stored).collect(),
            )
            .await?;
        Ok(Snapshot::new(revision))
    }

    /// The latest committed snapshot.
    pub async fn head(&self) -> EngineResult<Snapshot> {
        Ok(Snapshot::new(self.store.head().await?))
    }

    /// Drops tuple history and cached results older than `before`.
    ///
    /// Queries at earlier snapshots fail with `InvalidSnapshot` afterwards.
    pub async fn compact(&self, before: Snapshot) -> EngineResult<usize> {
        let dropped = self.store.compact(before.revision()).await?;
        if let Some(cache) = &self.cache {
            cache.invalidate_before(before).await;
        }
        info!(before = %before, dropped, "compacted");
        Ok(dropped)
    }

    pub async fn check(&self, request: &CheckRequest) -> EngineResult<CheckResult> {
        Ok(self.resolver.check(request).await?)
    }

    /// Evaluates up to [`batch::MAX_BATCH_SIZE`] checks at one snapshot.
    #[instrument(skip_all, fields(items = request.items.len(), snapshot = %request.snapshot))]
    pub async fn batch_check(&self, request: &BatchCheckRequest) -> EngineResult<BatchCheckResponse> {
        request.validate()?;
        let registry = self.models.get_model(request.model_id.as_deref()).await?;
        Ok(batch::run(&self.resolver, registry.model_id(), request).await)
    }

    pub async fn expand(&self, request: &ExpandRequest) -> EngineResult<ExpandResult> {
        Ok(self.resolver.expand(request).await?)
    }

    pub async fn list_objects(&self, request: &ListObjectsRequest) -> EngineResult<ListObjectsResult> {
        Ok(self.resolver.list_objects(request).await?)
    }
}
