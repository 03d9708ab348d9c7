//! Versioned model registry.
//!
//! Every loaded model description is compiled once into an immutable
//! `TypeRegistry` and kept under its model id. One version is current;
//! activating another swaps it atomically, and queries already running keep
//! the registry they resolved at their start.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::RwLock;
use tracing::info;

use relgraph_domain::error::{DomainError, DomainResult};
use relgraph_domain::model::{compile, ModelDescription, TypeRegistry};
use relgraph_domain::resolver::ModelReader;

/// Compiled model versions plus the current one.
#[derive(Default)]
pub struct ModelRegistry {
    versions: DashMap<String, Arc<TypeRegistry>>,
    current: RwLock<Option<Arc<TypeRegistry>>>,
}

impl ModelRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiles and stores a model version without activating it.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Compile` if the description does not compile;
    /// nothing is stored in that case.
    pub fn register(&self, model: &ModelDescription) -> DomainResult<Arc<TypeRegistry>> {
        let registry = Arc::new(compile(model)?);
        self.versions
            .insert(registry.model_id().to_string(), Arc::clone(&registry));
        Ok(registry)
    }

    /// Compiles, stores and activates a model version.
    pub async fn load(&self, model: &ModelDescription) -> DomainResult<Arc<TypeRegistry>> {
        let registry = self.register(model)?;
        self.swap(Arc::clone(&registry)).await;
        Ok(registry)
    }

    /// Makes a stored version current.
    pub async fn activate(&self, model_id: &str) -> DomainResult<()> {
        let registry = self.version(model_id)?;
        self.swap(registry).await;
        Ok(())
    }

    /// Id of the current version, if any model was activated.
    pub async fn current_id(&self) -> Option<String> {
        self.current
            .read()
            .await
            .as_ref()
            .map(|registry| registry.model_id().to_string())
    }

    /// Number of stored versions.
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    /// Whether no version was stored yet.
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    fn version(&self, model_id: &str) -> DomainResult<Arc<TypeRegistry>> {
        self.versions
            .get(model_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| DomainError::ModelNotFound {
                model_id: model_id.to_string(),
            })
    }

    async fn swap(&self, registry: Arc<TypeRegistry>) {
        info!(model_id = registry.model_id(), "activated model");
        *self.current.write().await = Some(registry);
    }
}

#[async_trait]
impl ModelReader for ModelRegistry {
    async fn get_model(&self, model_id: Option<&str>) -> DomainResult<Arc<TypeRegistry>> {
        match model_id {
            Some(id) => self.version(id),
            None => self
                .current
                .read()
                .await
                .clone()
                .ok_or_else(|| DomainError::ModelNotFound {
                    model_id: "<current>".to_string(),
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relgraph_domain::error::CompileError;
    use relgraph_domain::model::{RelationDefinition, TypeConstraint, TypeDefinition};

    fn model(relation: &str) -> ModelDescription {
        ModelDescription::with_types(
            "1.1",
            vec![
                TypeDefinition::new("user", vec![]),
                TypeDefinition::new(
                    "document",
                    vec![RelationDefinition::direct(
                        relation,
                        vec![TypeConstraint::direct("user")],
                    )],
                ),
            ],
        )
    }

    #[tokio::test]
    async fn test_no_current_model_is_model_not_found() {
        let registry = ModelRegistry::new();
        assert!(matches!(
            registry.get_model(None).await,
            Err(DomainError::ModelNotFound { .. })
        ));
        assert!(registry.current_id().await.is_none());
    }

    #[tokio::test]
    async fn test_load_activates_and_keeps_older_versions() {
        let registry = ModelRegistry::new();
        let first = registry.load(&model("viewer")).await.unwrap();
        let second = registry.load(&model("editor")).await.unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.current_id().await.as_deref(), Some(second.model_id()));
        let pinned = registry.get_model(Some(first.model_id())).await.unwrap();
        assert!(pinned.has_relation("document", "viewer"));

        registry.activate(first.model_id()).await.unwrap();
        let current = registry.get_model(None).await.unwrap();
        assert_eq!(current.model_id(), first.model_id());
    }

    #[tokio::test]
    async fn test_register_does_not_activate() {
        let registry = ModelRegistry::new();
        let current = registry.load(&model("viewer")).await.unwrap();
        registry.register(&model("editor")).unwrap();

        assert_eq!(registry.current_id().await.as_deref(), Some(current.model_id()));
    }

    #[tokio::test]
    async fn test_failed_compile_stores_nothing() {
        let registry = ModelRegistry::new();
        let broken = ModelDescription::with_types(
            "1.1",
            vec![TypeDefinition::new(
                "document",
                vec![RelationDefinition::direct(
                    "viewer",
                    vec![TypeConstraint::direct("user")],
                )],
            )],
        );

        let result = registry.load(&broken).await;
        assert!(matches!(
            result,
            Err(DomainError::Compile(CompileError::UndefinedType { .. }))
        ));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_activate_unknown_version_fails() {
        let registry = ModelRegistry::new();
        assert!(matches!(
            registry.activate("01UNKNOWN").await,
            Err(DomainError::ModelNotFound { .. })
        ));
    }
}
