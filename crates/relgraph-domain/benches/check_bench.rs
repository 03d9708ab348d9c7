//! Benchmarks for check evaluation.
//!
//! Run with: cargo bench -p relgraph-domain
//!
//! These benchmarks measure:
//! - Direct grants versus nested group chains of growing depth
//! - Wide union fan-out
//! - Warm-cache checks

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tokio::runtime::Runtime;

use relgraph_domain::cache::{QueryCache, QueryCacheConfig};
use relgraph_domain::error::DomainResult;
use relgraph_domain::model::{
    compile, ModelDescription, ObjectRef, RelationDefinition, Snapshot, Subject, TypeConstraint,
    TypeDefinition, TypeRegistry,
};
use relgraph_domain::resolver::{
    CheckRequest, GraphResolver, ModelReader, ResolverConfig, SubjectFilter, TupleReader,
};

// =============================================================================
// Benchmark-specific readers
// =============================================================================

/// Fast in-memory tuple reader; ignores snapshots.
#[derive(Default)]
struct BenchTupleReader {
    tuples: HashMap<(ObjectRef, String), Vec<Subject>>,
}

impl BenchTupleReader {
    fn add(&mut self, object: &str, relation: &str, subject: &str) {
        let object = ObjectRef::parse(object).unwrap();
        let subject = Subject::parse(subject).unwrap();
        self.tuples
            .entry((object, relation.to_string()))
            .or_default()
            .push(subject);
    }
}

#[async_trait]
impl TupleReader for BenchTupleReader {
    async fn read_direct(
        &self,
        object: &ObjectRef,
        relation: &str,
        filter: &SubjectFilter,
        _snapshot: Snapshot,
    ) -> DomainResult<Vec<Subject>> {
        Ok(self
            .tuples
            .get(&(object.clone(), relation.to_string()))
            .map(|subjects| subjects.iter().filter(|s| filter.matches(s)).cloned().collect())
            .unwrap_or_default())
    }

    async fn read_by_subject(
        &self,
        _object_type: &str,
        _relation: &str,
        _subject: &Subject,
        _snapshot: Snapshot,
    ) -> DomainResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn list_object_ids(&self, _object_type: &str, _snapshot: Snapshot) -> DomainResult<Vec<String>> {
        Ok(Vec::new())
    }
}

struct BenchModelReader(Arc<TypeRegistry>);

#[async_trait]
impl ModelReader for BenchModelReader {
    async fn get_model(&self, _model_id: Option<&str>) -> DomainResult<Arc<TypeRegistry>> {
        Ok(Arc::clone(&self.0))
    }
}

fn group_model() -> ModelDescription {
    ModelDescription::with_types(
        "1.1",
        vec![
            TypeDefinition::new("user", vec![]),
            TypeDefinition::new(
                "group",
                vec![RelationDefinition::direct(
                    "member",
                    vec![
                        TypeConstraint::direct("user"),
                        TypeConstraint::userset("group", "member"),
                    ],
                )],
            ),
        ],
    )
}

/// A chain `group:g0 <- g1 <- ... <- g{depth}` with alice at the bottom,
/// plus `width` sibling groups hanging off g0.
fn resolver(depth: usize, width: usize, config: ResolverConfig) -> GraphResolver<BenchTupleReader, BenchModelReader> {
    let mut reader = BenchTupleReader::default();
    for i in 0..depth {
        reader.add(&format!("group:g{i}"), "member", &format!("group:g{}#member", i + 1));
    }
    reader.add(&format!("group:g{depth}"), "member", "user:alice");
    for w in 0..width {
        reader.add("group:g0", "member", &format!("group:side{w}#member"));
        reader.add(&format!("group:side{w}"), "member", &format!("user:u{w}"));
    }

    let registry = Arc::new(compile(&group_model()).unwrap());
    GraphResolver::with_config(
        Arc::new(reader),
        Arc::new(BenchModelReader(registry)),
        config,
    )
}

fn request(subject: &str) -> CheckRequest {
    CheckRequest::parse("group:g0", "member", subject, Snapshot::new(1)).unwrap()
}

fn bench_chain_depth(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("check_chain_depth");

    for depth in [0, 5, 20] {
        let resolver = resolver(depth, 0, ResolverConfig::default());
        let check = request("user:alice");
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, _| {
            b.to_async(&rt).iter(|| async {
                let result = resolver.check(&check).await.unwrap();
                black_box(result.allowed)
            });
        });
    }
    group.finish();
}

fn bench_union_fan_out(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("check_fan_out");

    for width in [10, 100] {
        let resolver = resolver(0, width, ResolverConfig::default());
        // Denied, so every branch is visited.
        let check = request("user:nobody");
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, _| {
            b.to_async(&rt).iter(|| async {
                let result = resolver.check(&check).await.unwrap();
                black_box(result.allowed)
            });
        });
    }
    group.finish();
}

fn bench_warm_cache(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let cache = Arc::new(QueryCache::new(QueryCacheConfig::default()));
    let resolver = resolver(20, 10, ResolverConfig::default().with_cache(cache));
    let check = request("user:alice");
    rt.block_on(resolver.check(&check)).unwrap();

    c.bench_function("check_warm_cache", |b| {
        b.to_async(&rt).iter(|| async {
            let result = resolver.check(&check).await.unwrap();
            black_box(result.allowed)
        });
    });
}

criterion_group!(benches, bench_chain_depth, bench_union_fan_out, bench_warm_cache);
criterion_main!(benches);
