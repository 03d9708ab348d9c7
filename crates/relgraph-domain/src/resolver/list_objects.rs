//! Listing the objects of a type on which a subject holds a relation.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, instrument};

use crate::error::{DomainError, DomainResult};
use crate::model::{CompiledRelation, ObjectRef, Subject};

use super::context::{QueryScope, TraversalContext};
use super::graph_resolver::{validate_relation, validate_subject, GraphResolver};
use super::traits::{ModelReader, TupleReader};
use super::types::{ListObjectsRequest, ListObjectsResult};

impl<T, M> GraphResolver<T, M>
where
    T: TupleReader + 'static,
    M: ModelReader + 'static,
{
    /// Lists objects of `object_type` on which the subject has `relation`.
    ///
    /// Relations that are plain direct assignments of concrete subjects
    /// are answered from the reverse index. Anything else enumerates the
    /// type's objects and checks each one, `max_concurrency` at a time.
    ///
    /// Objects come back ordered by id. When `max_results` is set and more
    /// objects match, the list is cut and `truncated` is set.
    ///
    /// # Errors
    ///
    /// Any failed candidate check fails the whole listing, since the
    /// result would otherwise silently miss objects.
    #[instrument(
        skip(self, request),
        fields(
            object_type = %request.object_type,
            relation = %request.relation,
            subject = %request.subject,
            snapshot = %request.snapshot,
        )
    )]
    pub async fn list_objects(&self, request: &ListObjectsRequest) -> DomainResult<ListObjectsResult> {
        let registry = self
            .model_reader
            .get_model(request.model_id.as_deref())
            .await?;
        registry.get_type(&request.object_type)?;
        validate_relation(&registry, &request.object_type, &request.relation)?;
        validate_subject(&registry, &request.subject)?;
        for tuple in request.contextual_tuples.iter() {
            registry.validate_tuple(tuple)?;
        }

        let definition = registry.get_relation(&request.object_type, &request.relation)?;
        let scope = QueryScope::new(
            registry,
            request.snapshot,
            Some(request.subject.clone()),
            Arc::clone(&request.contextual_tuples),
        );

        let mut objects = self
            .with_deadline(request.timeout, async {
                if definition.is_concrete_direct() {
                    self.list_direct(&scope, &definition, &request.subject).await
                } else {
                    self.list_checked(&scope, request, request.max_results).await
                }
            })
            .await?;

        let truncated = match request.max_results {
            Some(max) if objects.len() > max => {
                objects.truncate(max);
                true
            }
            _ => false,
        };

        debug!(count = objects.len(), truncated, "list objects resolved");
        Ok(ListObjectsResult {
            objects,
            truncated,
            resolution: scope.stats.metadata(),
        })
    }

    /// Reverse lookup for relations that only hold concrete subjects.
    async fn list_direct(
        &self,
        scope: &QueryScope,
        definition: &CompiledRelation,
        subject: &Subject,
    ) -> DomainResult<Vec<ObjectRef>> {
        let mut lookups = vec![subject.clone()];
        if let Subject::Object(object) = subject {
            lookups.push(Subject::wildcard(object.object_type.clone()));
        }

        let mut ids = BTreeSet::new();
        for lookup in lookups.iter().filter(|s| definition.admits(s)) {
            scope.stats.record_read();
            let found = self
                .tuple_reader
                .read_by_subject(&definition.type_name, &definition.name, lookup, scope.snapshot)
                .await?;
            ids.extend(found);
        }

        ids.extend(
            scope
                .contextual_tuples
                .iter()
                .filter(|t| {
                    t.object.object_type == definition.type_name
                        && t.relation == definition.name
                        && definition.admits(&t.subject)
                        && t.subject.grants(subject)
                })
                .map(|t| t.object.object_id.clone()),
        );

        scope.stats.reached(1);
        Ok(ids
            .into_iter()
            .map(|id| ObjectRef::new(definition.type_name.clone(), id))
            .collect())
    }

    /// Checks every candidate object in id order, stopping once one more
    /// object than the cap has been found.
    async fn list_checked(
        &self,
        scope: &QueryScope,
        request: &ListObjectsRequest,
        max_results: Option<usize>,
    ) -> DomainResult<Vec<ObjectRef>> {
        scope.stats.record_read();
        let mut candidates: BTreeSet<String> = self
            .tuple_reader
            .list_object_ids(&request.object_type, scope.snapshot)
            .await?
            .into_iter()
            .collect();
        candidates.extend(
            scope
                .contextual_tuples
                .iter()
                .filter(|t| t.object.object_type == request.object_type)
                .map(|t| t.object.object_id.clone()),
        );
        debug!(candidates = candidates.len(), "checking list candidates");

        let mut checks = stream::iter(candidates)
            .map(|id| {
                let object = ObjectRef::new(request.object_type.clone(), id);
                async move {
                    let resolution = self
                        .resolve_check(scope, object.clone(), request.relation.clone(), TraversalContext::new())
                        .await?;
                    Ok::<_, DomainError>((object, resolution.allowed))
                }
            })
            .buffered(self.config.max_concurrency);

        let mut objects = Vec::new();
        while let Some(result) = checks.next().await {
            let (object, allowed) = result?;
            if allowed {
                objects.push(object);
                if max_results.is_some_and(|max| objects.len() > max) {
                    break;
                }
            }
        }
        Ok(objects)
    }
}
