//! Expansion of a relation into the userset tree that defines it.

use std::sync::Arc;

use futures::future::try_join_all;
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, instrument, warn};

use crate::cache::CachedValue;
use crate::error::{DomainError, DomainResult};
use crate::model::{CompiledRelation, Expression, ObjectRef, Subject};

use super::context::{QueryScope, TraversalContext};
use super::graph_resolver::{validate_object, validate_relation, Admission, BoxFuture, GraphResolver};
use super::traits::{ModelReader, SubjectFilter, TupleReader};
use super::types::{
    ExpandLeaf, ExpandLeafValue, ExpandMode, ExpandNode, ExpandRequest, ExpandResult, UsersetTree,
};

/// A subtree together with what it took to build it.
struct Expansion {
    node: ExpandNode,
    height: u32,
    cycle_cut: bool,
}

/// Builds a node over already expanded children, carrying their height
/// and cycle taint.
fn combine(children: Vec<Expansion>, build: impl FnOnce(Vec<ExpandNode>) -> ExpandNode) -> Expansion {
    let height = children.iter().map(|c| c.height).max().unwrap_or(0);
    let cycle_cut = children.iter().any(|c| c.cycle_cut);
    Expansion {
        node: build(children.into_iter().map(|c| c.node).collect()),
        height,
        cycle_cut,
    }
}

fn leaf(name: &str, value: ExpandLeafValue) -> ExpandNode {
    ExpandNode::Leaf(ExpandLeaf {
        name: name.to_string(),
        value,
    })
}

impl<T, M> GraphResolver<T, M>
where
    T: TupleReader + 'static,
    M: ModelReader + 'static,
{
    /// Expands a relation on an object into its userset tree.
    ///
    /// For a relation defined as `viewer: [user, domain#member] or editor`,
    /// expanding `document:readme#viewer` yields a union node with a leaf of
    /// directly stored subjects and a computed reference to `editor`; in
    /// recursive mode both references are expanded in place.
    ///
    /// # Errors
    ///
    /// Fails with `DepthExceeded` when a recursive expansion goes deeper
    /// than `max_depth`. Cycles do not fail; they leave a truncated leaf.
    #[instrument(
        skip(self, request),
        fields(
            object = %request.object,
            relation = %request.relation,
            snapshot = %request.snapshot,
            mode = ?request.mode,
        )
    )]
    pub async fn expand(&self, request: &ExpandRequest) -> DomainResult<ExpandResult> {
        let registry = self
            .model_reader
            .get_model(request.model_id.as_deref())
            .await?;
        validate_object(&request.object)?;
        validate_relation(&registry, &request.object.object_type, &request.relation)?;

        let scope = QueryScope::new(registry, request.snapshot, None, Arc::new(Vec::new()));
        let expansion = self
            .with_deadline(
                request.timeout,
                self.expand_relation(
                    &scope,
                    request.mode,
                    request.object.clone(),
                    request.relation.clone(),
                    TraversalContext::new(),
                ),
            )
            .await?;

        debug!(truncated = expansion.cycle_cut, "expand resolved");
        Ok(ExpandResult {
            tree: UsersetTree {
                root: expansion.node,
            },
            resolution: scope.stats.metadata(),
        })
    }

    /// Expands one (object, relation) step (boxed for recursion).
    fn expand_relation<'a>(
        &'a self,
        scope: &'a QueryScope,
        mode: ExpandMode,
        object: ObjectRef,
        relation: String,
        ctx: TraversalContext,
    ) -> BoxFuture<'a, DomainResult<Expansion>> {
        Box::pin(async move {
            if ctx.depth >= self.config.max_depth {
                warn!(
                    object = %object,
                    relation = %relation,
                    max_depth = self.config.max_depth,
                    "expansion depth limit exceeded"
                );
                return Err(DomainError::DepthExceeded {
                    max_depth: self.config.max_depth,
                });
            }
            scope.stats.reached(ctx.depth + 1);

            let name = format!("{}#{}", object, relation);
            if ctx.is_visited(&object, &relation) {
                scope.stats.record_cycle();
                return Ok(Expansion {
                    node: leaf(&name, ExpandLeafValue::Truncated),
                    height: 1,
                    cycle_cut: true,
                });
            }

            // Shallow trees are cheap and not worth sharing.
            let admission = match mode {
                ExpandMode::Recursive => self.admit(scope, &object, &relation, &ctx).await,
                ExpandMode::Shallow => Admission::Local,
            };
            let guard = match admission {
                Admission::Reused(CachedValue::Expand { node, height }) => {
                    return Ok(Expansion {
                        node: (*node).clone(),
                        height,
                        cycle_cut: false,
                    });
                }
                Admission::Lead(guard) => Some(guard),
                Admission::Reused(CachedValue::Check { .. }) | Admission::Local => None,
            };

            let definition = scope.registry.get_relation(&object.object_type, &relation)?;
            let child_ctx = ctx.enter(
                (object.clone(), relation.clone()),
                guard.as_ref().map(|g| g.key()),
            );
            let inner = self
                .expand_expression(
                    scope,
                    mode,
                    &object,
                    &definition,
                    &definition.expression,
                    &name,
                    &child_ctx,
                )
                .await?;
            let expansion = Expansion {
                height: inner.height + 1,
                ..inner
            };

            if mode == ExpandMode::Recursive && !expansion.cycle_cut {
                self.share(
                    scope,
                    &object,
                    &relation,
                    guard,
                    CachedValue::Expand {
                        node: Arc::new(expansion.node.clone()),
                        height: expansion.height,
                    },
                )
                .await;
            }
            Ok(expansion)
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn expand_expression<'a>(
        &'a self,
        scope: &'a QueryScope,
        mode: ExpandMode,
        object: &'a ObjectRef,
        definition: &'a CompiledRelation,
        expression: &'a Expression,
        name: &'a str,
        ctx: &'a TraversalContext,
    ) -> BoxFuture<'a, DomainResult<Expansion>> {
        Box::pin(async move {
            match expression {
                Expression::Direct { allowed } => {
                    let mut stored: Vec<Subject> = self
                        .read_direct(scope, object, &definition.name, &SubjectFilter::Any)
                        .await?
                        .into_iter()
                        .filter(|s| allowed.iter().any(|c| c.admits(s)))
                        .collect();
                    stored.sort();
                    stored.dedup();

                    let targets = match mode {
                        ExpandMode::Recursive => stored
                            .iter()
                            .filter_map(|s| match s {
                                Subject::Userset { object, relation } => {
                                    Some((object.clone(), relation.clone()))
                                }
                                _ => None,
                            })
                            .collect(),
                        ExpandMode::Shallow => Vec::new(),
                    };
                    let expanded = self.expand_targets(scope, mode, targets, ctx).await?;

                    let subjects = stored.iter().map(Subject::to_string).collect();
                    Ok(combine(expanded, |expanded| {
                        leaf(name, ExpandLeafValue::Subjects { subjects, expanded })
                    }))
                }

                Expression::ComputedRelation { relation } => {
                    let userset = format!("{}#{}", object, relation);
                    let expanded = match mode {
                        ExpandMode::Recursive => vec![
                            self.expand_relation(scope, mode, object.clone(), relation.clone(), ctx.clone())
                                .await?,
                        ],
                        ExpandMode::Shallow => Vec::new(),
                    };
                    Ok(combine(expanded, |expanded| {
                        leaf(
                            name,
                            ExpandLeafValue::Computed {
                                userset,
                                expanded: expanded.into_iter().next().map(Box::new),
                            },
                        )
                    }))
                }

                Expression::TupleToUserset {
                    tupleset,
                    computed_relation,
                    target_types,
                } => {
                    let related = self
                        .related_objects(scope, object, tupleset, target_types)
                        .await?;
                    let targets = match mode {
                        ExpandMode::Recursive => related
                            .iter()
                            .map(|o| (o.clone(), computed_relation.clone()))
                            .collect(),
                        ExpandMode::Shallow => Vec::new(),
                    };
                    let expanded = self.expand_targets(scope, mode, targets, ctx).await?;

                    Ok(combine(expanded, |expanded| {
                        leaf(
                            name,
                            ExpandLeafValue::TupleToUserset {
                                tupleset: tupleset.clone(),
                                computed_userset: computed_relation.clone(),
                                related: related.iter().map(ObjectRef::to_string).collect(),
                                expanded,
                            },
                        )
                    }))
                }

                Expression::Union(children) => {
                    let children = try_join_all(children.iter().map(|child| {
                        self.expand_expression(scope, mode, object, definition, child, name, ctx)
                    }))
                    .await?;
                    Ok(combine(children, |nodes| ExpandNode::Union {
                        name: name.to_string(),
                        nodes,
                    }))
                }

                Expression::Intersection(children) => {
                    let children = try_join_all(children.iter().map(|child| {
                        self.expand_expression(scope, mode, object, definition, child, name, ctx)
                    }))
                    .await?;
                    Ok(combine(children, |nodes| ExpandNode::Intersection {
                        name: name.to_string(),
                        nodes,
                    }))
                }

                Expression::Exclusion { base, subtract } => {
                    let (base, subtract) = futures::try_join!(
                        self.expand_expression(scope, mode, object, definition, base, name, ctx),
                        self.expand_expression(scope, mode, object, definition, subtract, name, ctx),
                    )?;
                    Ok(Expansion {
                        height: base.height.max(subtract.height),
                        cycle_cut: base.cycle_cut || subtract.cycle_cut,
                        node: ExpandNode::Difference {
                            name: name.to_string(),
                            base: Box::new(base.node),
                            subtract: Box::new(subtract.node),
                        },
                    })
                }
            }
        })
    }

    /// Expands targets in order, with bounded concurrency.
    async fn expand_targets(
        &self,
        scope: &QueryScope,
        mode: ExpandMode,
        targets: Vec<(ObjectRef, String)>,
        ctx: &TraversalContext,
    ) -> DomainResult<Vec<Expansion>> {
        stream::iter(targets)
            .map(|(object, relation)| self.expand_relation(scope, mode, object, relation, ctx.clone()))
            .buffered(self.config.max_concurrency)
            .try_collect()
            .await
    }
}
