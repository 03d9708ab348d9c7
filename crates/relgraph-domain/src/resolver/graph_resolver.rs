//! Graph resolver for permission checks.
//!
//! The resolver walks the compiled relation expressions of a pinned model
//! version, reading tuples at the request's snapshot.
//!
//! # Evaluation
//!
//! - **Parallel Execution**: Union, intersection and exclusion operands, as
//!   well as userset and tuple-to-userset targets, are evaluated
//!   concurrently with `FuturesUnordered` and short-circuit on the first
//!   conclusive operand. Dropping the remaining futures cancels them.
//!
//! - **Error Dominance**: A conclusive operand beats sibling errors. A union
//!   with one true child is true even if another child failed.
//!
//! - **Cycle Detection**: Every path carries the (object, relation) pairs it
//!   went through. Re-entering a pair yields "not granted" on that path and
//!   marks the outcome as cycle-dependent.
//!
//! - **Depth Limiting**: Each (object, relation) step counts one level;
//!   reaching `max_depth` (default 25) fails the query with `DepthExceeded`.
//!
//! - **Reuse**: Steps consult the memo cache and in-flight computations of
//!   other queries. Only successful, cycle-independent outcomes are shared,
//!   and only with callers for which the outcome's height still fits under
//!   the depth ceiling.

use std::future::Future;
use std::pin::{pin, Pin};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{select, Either};
use futures::stream::{self, FuturesUnordered, Stream, StreamExt};
use tokio::time::timeout;
use tracing::{debug, instrument, trace, warn};

use crate::cache::{CacheKey, CachedValue, Singleflight, SingleflightGuard, SingleflightSlot};
use crate::error::{DomainError, DomainResult};
use crate::model::{CompiledRelation, Expression, ObjectRef, Subject, TypeConstraint, TypeRegistry};

use super::config::ResolverConfig;
use super::context::{QueryScope, TraversalContext};
use super::traits::{ModelReader, SubjectFilter, TupleReader};
use super::types::{CheckRequest, CheckResult, Resolution};

/// Type alias for boxed future to handle async recursion.
pub(super) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// How a step obtained (or failed to obtain) a shared result.
pub(super) enum Admission<'a> {
    /// A cached or in-flight result usable at this depth.
    Reused(CachedValue),
    /// This step leads the flight for its key and must publish.
    Lead(SingleflightGuard<'a, CacheKey, CachedValue>),
    /// Compute without sharing.
    Local,
}

/// Graph resolver for permission checks, expansion and object listing.
///
/// # Caching and deduplication
///
/// When a cache is configured, every (object, relation) step is memoized
/// under `(model, snapshot, object, relation, subject)`. Independently,
/// identical steps running concurrently share one computation; a step only
/// waits on a flight whose key orders after every flight its own path
/// leads, which rules out wait cycles. Requests with contextual tuples
/// skip both.
pub struct GraphResolver<T, M> {
    pub(super) tuple_reader: Arc<T>,
    pub(super) model_reader: Arc<M>,
    pub(super) config: ResolverConfig,
    pub(super) flights: Singleflight<CacheKey, CachedValue>,
}

impl<T, M> GraphResolver<T, M>
where
    T: TupleReader + 'static,
    M: ModelReader + 'static,
{
    /// Creates a new graph resolver.
    pub fn new(tuple_reader: Arc<T>, model_reader: Arc<M>) -> Self {
        Self::with_config(tuple_reader, model_reader, ResolverConfig::default())
    }

    /// Creates a new graph resolver with custom configuration.
    pub fn with_config(tuple_reader: Arc<T>, model_reader: Arc<M>, config: ResolverConfig) -> Self {
        Self {
            tuple_reader,
            model_reader,
            config,
            flights: Singleflight::new(),
        }
    }

    /// Returns the resolver configuration.
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Number of sub-queries currently being computed on behalf of others.
    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }

    /// Performs a permission check.
    ///
    /// The model version is resolved once and used for the whole query.
    #[instrument(
        skip(self, request),
        fields(
            object = %request.object,
            relation = %request.relation,
            subject = %request.subject,
            snapshot = %request.snapshot,
        )
    )]
    pub async fn check(&self, request: &CheckRequest) -> DomainResult<CheckResult> {
        let registry = self
            .model_reader
            .get_model(request.model_id.as_deref())
            .await?;
        validate_check_request(&registry, request)?;

        let scope = QueryScope::new(
            registry,
            request.snapshot,
            Some(request.subject.clone()),
            Arc::clone(&request.contextual_tuples),
        );
        let resolution = self
            .with_deadline(
                request.timeout,
                self.resolve_check(
                    &scope,
                    request.object.clone(),
                    request.relation.clone(),
                    TraversalContext::new(),
                ),
            )
            .await?;

        let metadata = scope.stats.metadata();
        debug!(
            allowed = resolution.allowed,
            depth = metadata.depth,
            reads = metadata.datastore_reads,
            "check resolved"
        );
        Ok(CheckResult {
            allowed: resolution.allowed,
            resolution: metadata,
        })
    }

    /// Runs `operation` under the request deadline (or the configured one).
    pub(super) async fn with_deadline<F, R>(
        &self,
        deadline: Option<Duration>,
        operation: F,
    ) -> DomainResult<R>
    where
        F: Future<Output = DomainResult<R>>,
    {
        let deadline = deadline.unwrap_or(self.config.timeout);
        match timeout(deadline, operation).await {
            Ok(result) => result,
            Err(_) => {
                let duration_ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX);
                warn!(duration_ms, "query deadline exceeded");
                Err(DomainError::DeadlineExceeded { duration_ms })
            }
        }
    }

    /// Resolves whether the scope's subject holds `relation` on `object`.
    pub(super) fn resolve_check<'a>(
        &'a self,
        scope: &'a QueryScope,
        object: ObjectRef,
        relation: String,
        ctx: TraversalContext,
    ) -> BoxFuture<'a, DomainResult<Resolution>> {
        Box::pin(async move {
            if ctx.depth >= self.config.max_depth {
                warn!(
                    object = %object,
                    relation = %relation,
                    max_depth = self.config.max_depth,
                    "depth limit exceeded"
                );
                return Err(DomainError::DepthExceeded {
                    max_depth: self.config.max_depth,
                });
            }
            scope.stats.reached(ctx.depth + 1);

            if ctx.is_visited(&object, &relation) {
                debug!(object = %object, relation = %relation, "cycle cut");
                scope.stats.record_cycle();
                return Ok(Resolution::cycle());
            }

            let guard = match self.admit(scope, &object, &relation, &ctx).await {
                Admission::Reused(CachedValue::Check { allowed, height }) => {
                    return Ok(Resolution {
                        allowed,
                        height,
                        cycle_cut: false,
                    });
                }
                Admission::Lead(guard) => Some(guard),
                Admission::Reused(CachedValue::Expand { .. }) | Admission::Local => None,
            };

            let definition = scope.registry.get_relation(&object.object_type, &relation)?;
            trace!(
                object = %object,
                relation = %relation,
                rewrite = definition.expression.kind(),
                depth = ctx.depth,
                "evaluating relation"
            );
            let child_ctx = ctx.enter(
                (object.clone(), relation.clone()),
                guard.as_ref().map(|g| g.key()),
            );
            let inner = self
                .evaluate(scope, &object, &definition, &definition.expression, &child_ctx)
                .await?;
            let resolution = Resolution {
                height: inner.height + 1,
                ..inner
            };

            if !resolution.cycle_cut {
                self.share(
                    scope,
                    &object,
                    &relation,
                    guard,
                    CachedValue::Check {
                        allowed: resolution.allowed,
                        height: resolution.height,
                    },
                )
                .await;
            }
            Ok(resolution)
        })
    }

    /// Evaluates one expression of a relation (boxed for recursion).
    ///
    /// Operators do not count as depth; only (object, relation) steps do.
    fn evaluate<'a>(
        &'a self,
        scope: &'a QueryScope,
        object: &'a ObjectRef,
        definition: &'a CompiledRelation,
        expression: &'a Expression,
        ctx: &'a TraversalContext,
    ) -> BoxFuture<'a, DomainResult<Resolution>> {
        Box::pin(async move {
            match expression {
                Expression::Direct { allowed } => {
                    self.resolve_direct(scope, object, &definition.name, allowed, ctx)
                        .await
                }

                Expression::ComputedRelation { relation } => {
                    self.resolve_check(scope, object.clone(), relation.clone(), ctx.clone())
                        .await
                }

                Expression::TupleToUserset {
                    tupleset,
                    computed_relation,
                    target_types,
                } => {
                    self.resolve_tuple_to_userset(
                        scope,
                        object,
                        tupleset,
                        computed_relation,
                        target_types,
                        ctx,
                    )
                    .await
                }

                Expression::Union(children) => {
                    let branches: FuturesUnordered<_> = children
                        .iter()
                        .map(|child| self.evaluate(scope, object, definition, child, ctx))
                        .collect();
                    any_of(branches).await
                }

                Expression::Intersection(children) => {
                    let branches: FuturesUnordered<_> = children
                        .iter()
                        .map(|child| self.evaluate(scope, object, definition, child, ctx))
                        .collect();
                    all_of(branches).await
                }

                Expression::Exclusion { base, subtract } => {
                    let base = self.evaluate(scope, object, definition, base, ctx);
                    let subtract = self.evaluate(scope, object, definition, subtract, ctx);
                    match select(base, subtract).await {
                        Either::Left((base, subtract)) => match base {
                            Ok(b) if !b.allowed => Ok(b),
                            base => exclude(base, subtract.await),
                        },
                        Either::Right((subtract, base)) => match subtract {
                            Ok(s) if s.allowed => Ok(Resolution {
                                allowed: false,
                                ..s
                            }),
                            subtract => exclude(base.await, subtract),
                        },
                    }
                }
            }
        })
    }

    /// Resolves a direct assignment.
    ///
    /// Stored subjects outside the relation's allowed types are ignored.
    /// A matching subject or typed wildcard grants immediately; otherwise
    /// every userset subject is checked for membership.
    async fn resolve_direct(
        &self,
        scope: &QueryScope,
        object: &ObjectRef,
        relation: &str,
        allowed: &[TypeConstraint],
        ctx: &TraversalContext,
    ) -> DomainResult<Resolution> {
        let Some(subject) = scope.subject.as_ref() else {
            return Ok(Resolution::new(false));
        };

        let stored = self
            .read_direct(scope, object, relation, &SubjectFilter::Any)
            .await?;
        let admitted: Vec<&Subject> = stored
            .iter()
            .chain(scope.contextual_subjects(object, relation))
            .filter(|s| allowed.iter().any(|c| c.admits(s)))
            .collect();

        if admitted.iter().any(|s| s.grants(subject)) {
            return Ok(Resolution::new(true));
        }

        let mut usersets: Vec<(ObjectRef, String)> = admitted
            .iter()
            .filter_map(|s| match s {
                Subject::Userset { object, relation } => Some((object.clone(), relation.clone())),
                _ => None,
            })
            .collect();
        usersets.sort();
        usersets.dedup();

        self.resolve_any(scope, usersets, ctx).await
    }

    /// Resolves a tuple-to-userset: the computed relation on any object
    /// reached through the tupleset.
    async fn resolve_tuple_to_userset(
        &self,
        scope: &QueryScope,
        object: &ObjectRef,
        tupleset: &str,
        computed_relation: &str,
        target_types: &[String],
        ctx: &TraversalContext,
    ) -> DomainResult<Resolution> {
        let related = self.related_objects(scope, object, tupleset, target_types).await?;
        let targets = related
            .into_iter()
            .map(|o| (o, computed_relation.to_string()))
            .collect();
        self.resolve_any(scope, targets, ctx).await
    }

    /// Objects reached from `object` through `tupleset`, restricted to
    /// `target_types`, in id order.
    pub(super) async fn related_objects(
        &self,
        scope: &QueryScope,
        object: &ObjectRef,
        tupleset: &str,
        target_types: &[String],
    ) -> DomainResult<Vec<ObjectRef>> {
        let filter = SubjectFilter::ObjectTypes(target_types.to_vec());
        let stored = self.read_direct(scope, object, tupleset, &filter).await?;

        let mut related: Vec<ObjectRef> = stored
            .iter()
            .chain(scope.contextual_subjects(object, tupleset))
            .filter(|s| filter.matches(s))
            .filter_map(|s| match s {
                Subject::Object(o) => Some(o.clone()),
                _ => None,
            })
            .collect();
        related.sort();
        related.dedup();
        Ok(related)
    }

    /// Existential check over targets, with bounded concurrency.
    async fn resolve_any(
        &self,
        scope: &QueryScope,
        targets: Vec<(ObjectRef, String)>,
        ctx: &TraversalContext,
    ) -> DomainResult<Resolution> {
        if targets.is_empty() {
            return Ok(Resolution::new(false));
        }
        let results = stream::iter(targets)
            .map(|(object, relation)| self.resolve_check(scope, object, relation, ctx.clone()))
            .buffer_unordered(self.config.max_concurrency);
        any_of(results).await
    }

    /// Tuple read counted in the query statistics.
    pub(super) async fn read_direct(
        &self,
        scope: &QueryScope,
        object: &ObjectRef,
        relation: &str,
        filter: &SubjectFilter,
    ) -> DomainResult<Vec<Subject>> {
        scope.stats.record_read();
        self.tuple_reader
            .read_direct(object, relation, filter, scope.snapshot)
            .await
    }

    /// Looks for a reusable result for the step on `(object, relation)`,
    /// registering a flight when none is running.
    pub(super) async fn admit<'a>(
        &'a self,
        scope: &QueryScope,
        object: &ObjectRef,
        relation: &str,
        ctx: &TraversalContext,
    ) -> Admission<'a> {
        if !scope.shareable() {
            return Admission::Local;
        }
        let key = scope.key(object, relation);
        let max_depth = self.config.max_depth;

        if let Some(cache) = &self.config.cache {
            // History below the horizon is gone; only the store may answer.
            if cache.is_expired(scope.snapshot) {
                return Admission::Local;
            }
            if let Some(value) = cache.get(&key).await {
                if value.fits(ctx.depth, max_depth) {
                    scope.stats.record_cache_hit();
                    scope.stats.reached(ctx.depth + value.height());
                    return Admission::Reused(value);
                }
            }
        }

        if !self.config.dedup {
            return Admission::Local;
        }

        match self.flights.acquire(&key, || ctx.may_wait_on(&key)) {
            Some(SingleflightSlot::Leader(sender)) => {
                Admission::Lead(SingleflightGuard::new(&self.flights, key, sender))
            }
            Some(SingleflightSlot::Follower(mut receiver)) => match receiver.recv().await {
                Ok(value) if value.fits(ctx.depth, max_depth) => {
                    debug!(object = %object, relation, "joined in-flight computation");
                    scope.stats.record_dedup_join();
                    scope.stats.reached(ctx.depth + value.height());
                    Admission::Reused(value)
                }
                // The leader failed, was cancelled, or went deeper than we may.
                _ => Admission::Local,
            },
            None => Admission::Local,
        }
    }

    /// Publishes a cycle-independent result to the cache and to followers.
    ///
    /// The cache is filled before the flight retires so callers arriving
    /// in between find the entry.
    pub(super) async fn share(
        &self,
        scope: &QueryScope,
        object: &ObjectRef,
        relation: &str,
        guard: Option<SingleflightGuard<'_, CacheKey, CachedValue>>,
        value: CachedValue,
    ) {
        if !scope.shareable() {
            return;
        }
        if let Some(cache) = &self.config.cache {
            cache.insert(scope.key(object, relation), value.clone()).await;
        }
        if let Some(guard) = guard {
            guard.publish(value);
        }
    }
}

/// Union semantics: true if any result is true, else the first error,
/// else false.
async fn any_of<S>(results: S) -> DomainResult<Resolution>
where
    S: Stream<Item = DomainResult<Resolution>>,
{
    let mut results = pin!(results);
    let mut combined = Resolution::new(false);
    let mut first_error = None;

    while let Some(result) = results.next().await {
        match result {
            Ok(r) if r.allowed => return Ok(r),
            Ok(r) => {
                combined.height = combined.height.max(r.height);
                combined.cycle_cut |= r.cycle_cut;
            }
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(combined),
    }
}

/// Intersection semantics: false if any result is false, else the first
/// error, else true.
async fn all_of<S>(results: S) -> DomainResult<Resolution>
where
    S: Stream<Item = DomainResult<Resolution>>,
{
    let mut results = pin!(results);
    let mut combined = Resolution::new(true);
    let mut first_error = None;

    while let Some(result) = results.next().await {
        match result {
            Ok(r) if !r.allowed => return Ok(r),
            Ok(r) => {
                combined.height = combined.height.max(r.height);
                combined.cycle_cut |= r.cycle_cut;
            }
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(combined),
    }
}

/// Exclusion semantics once both operands are known.
///
/// Base false or subtract true decide on their own; otherwise an error on
/// either side propagates.
fn exclude(
    base: DomainResult<Resolution>,
    subtract: DomainResult<Resolution>,
) -> DomainResult<Resolution> {
    match (base, subtract) {
        (Ok(b), _) if !b.allowed => Ok(b),
        (_, Ok(s)) if s.allowed => Ok(Resolution {
            allowed: false,
            ..s
        }),
        (Ok(b), Ok(s)) => Ok(Resolution {
            allowed: true,
            height: b.height.max(s.height),
            cycle_cut: b.cycle_cut || s.cycle_cut,
        }),
        (Err(e), _) | (_, Err(e)) => Err(e),
    }
}

/// Validates an object reference.
pub(super) fn validate_object(object: &ObjectRef) -> DomainResult<()> {
    ObjectRef::parse(&object.to_string())
        .map(|_| ())
        .map_err(|_| DomainError::InvalidObjectFormat {
            value: object.to_string(),
        })
}

/// Validates a requesting subject against the model.
pub(super) fn validate_subject(registry: &TypeRegistry, subject: &Subject) -> DomainResult<()> {
    if let Subject::Object(object) | Subject::Userset { object, .. } = subject {
        if ObjectRef::parse(&object.to_string()).is_err() {
            return Err(DomainError::InvalidSubjectFormat {
                value: subject.to_string(),
            });
        }
    }
    registry.validate_subject(subject)
}

/// Validates that the relation is well formed and declared on `object_type`.
pub(super) fn validate_relation(
    registry: &TypeRegistry,
    object_type: &str,
    relation: &str,
) -> DomainResult<()> {
    if relation.is_empty() || relation.contains(&[':', '#', '@'][..]) {
        return Err(DomainError::InvalidRelationFormat {
            value: relation.to_string(),
        });
    }
    registry.get_relation(object_type, relation).map(|_| ())
}

fn validate_check_request(registry: &TypeRegistry, request: &CheckRequest) -> DomainResult<()> {
    validate_object(&request.object)?;
    validate_relation(registry, &request.object.object_type, &request.relation)?;
    validate_subject(registry, &request.subject)?;
    for tuple in request.contextual_tuples.iter() {
        registry.validate_tuple(tuple)?;
    }
    Ok(())
}
