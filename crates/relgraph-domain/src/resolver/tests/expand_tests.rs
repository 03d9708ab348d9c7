//! Expand tests.

use std::collections::BTreeSet;
use std::sync::Arc;

use super::mocks::{document_model, example_model, group_model, MockModelReader, MockTupleReader};
use crate::cache::{QueryCache, QueryCacheConfig};
use crate::error::DomainError;
use crate::model::{ModelDescription, ObjectRef, RelationDefinition, Snapshot, TypeConstraint, Userset};
use crate::resolver::{
    ExpandLeaf, ExpandLeafValue, ExpandMode, ExpandNode, ExpandRequest, GraphResolver, ResolverConfig,
};

fn expand_request(object: &str, relation: &str) -> ExpandRequest {
    ExpandRequest::new(ObjectRef::parse(object).unwrap(), relation, Snapshot::new(1))
}

fn set(values: &[&str]) -> BTreeSet<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn inherited_model() -> ModelDescription {
    document_model(vec![
        RelationDefinition::direct("parent", vec![TypeConstraint::direct("folder")]),
        RelationDefinition::direct("editor", vec![TypeConstraint::direct("user")]),
        RelationDefinition::direct("blocked", vec![TypeConstraint::direct("user")]),
        RelationDefinition::rewritten(
            "viewer",
            vec![TypeConstraint::direct("user")],
            Userset::Union {
                children: vec![
                    Userset::This,
                    Userset::computed("editor"),
                    Userset::tuple_to_userset("parent", "viewer"),
                ],
            },
        ),
        RelationDefinition::rewritten(
            "reader",
            vec![],
            Userset::exclusion(Userset::computed("viewer"), Userset::computed("blocked")),
        ),
    ])
}

async fn inherited_tuples() -> Arc<MockTupleReader> {
    let tuples = Arc::new(MockTupleReader::new());
    tuples.add("document:doc1", "viewer", "user:alice").await;
    tuples.add("document:doc1", "editor", "user:bob").await;
    tuples.add("document:doc1", "parent", "folder:f1").await;
    tuples.add("folder:f1", "viewer", "user:carol").await;
    tuples
}

#[tokio::test]
async fn test_shallow_expand_leaves_references_unresolved() {
    let resolver = GraphResolver::new(
        inherited_tuples().await,
        Arc::new(MockModelReader::new(&inherited_model())),
    );

    let request = expand_request("document:doc1", "viewer").with_mode(ExpandMode::Shallow);
    let tree = resolver.expand(&request).await.unwrap().tree;

    let expected = ExpandNode::Union {
        name: "document:doc1#viewer".to_string(),
        nodes: vec![
            ExpandNode::Leaf(ExpandLeaf {
                name: "document:doc1#viewer".to_string(),
                value: ExpandLeafValue::Subjects {
                    subjects: vec!["user:alice".to_string()],
                    expanded: vec![],
                },
            }),
            ExpandNode::Leaf(ExpandLeaf {
                name: "document:doc1#viewer".to_string(),
                value: ExpandLeafValue::Computed {
                    userset: "document:doc1#editor".to_string(),
                    expanded: None,
                },
            }),
            ExpandNode::Leaf(ExpandLeaf {
                name: "document:doc1#viewer".to_string(),
                value: ExpandLeafValue::TupleToUserset {
                    tupleset: "parent".to_string(),
                    computed_userset: "viewer".to_string(),
                    related: vec!["folder:f1".to_string()],
                    expanded: vec![],
                },
            }),
        ],
    };
    assert_eq!(tree.root, expected);
    assert_eq!(tree.subjects(), set(&["user:alice"]));
}

#[tokio::test]
async fn test_recursive_expand_collects_every_contributing_subject() {
    let resolver = GraphResolver::new(
        inherited_tuples().await,
        Arc::new(MockModelReader::new(&inherited_model())),
    );

    let result = resolver
        .expand(&expand_request("document:doc1", "viewer"))
        .await
        .unwrap();
    assert_eq!(
        result.tree.subjects(),
        set(&["user:alice", "user:bob", "user:carol"])
    );
    assert!(!result.tree.root.is_truncated());
    assert_eq!(result.resolution.depth, 2);
}

#[tokio::test]
async fn test_recursive_expand_nests_named_subtrees() {
    let tuples = Arc::new(MockTupleReader::new());
    tuples.add("domain:acme", "member", "user:alice").await;
    tuples.add("document:doc1", "viewer", "domain:acme#member").await;
    tuples.add("document:doc1", "viewer", "user:bob").await;
    let resolver = GraphResolver::new(tuples, Arc::new(MockModelReader::new(&example_model())));

    let tree = resolver
        .expand(&expand_request("document:doc1", "viewer"))
        .await
        .unwrap()
        .tree;

    let ExpandNode::Leaf(ExpandLeaf {
        name,
        value: ExpandLeafValue::Subjects { subjects, expanded },
    }) = &tree.root
    else {
        panic!("expected a subjects leaf, got {:?}", tree.root);
    };
    assert_eq!(name, "document:doc1#viewer");
    assert_eq!(subjects.len(), 2);
    assert!(subjects.contains(&"domain:acme#member".to_string()));
    assert_eq!(expanded.len(), 1);
    assert_eq!(expanded[0].name(), "domain:acme#member");
    assert_eq!(tree.subjects(), set(&["user:alice", "user:bob"]));
}

#[tokio::test]
async fn test_expand_difference_applies_set_algebra() {
    let tuples = inherited_tuples().await;
    tuples.add("document:doc1", "blocked", "user:bob").await;
    let resolver = GraphResolver::new(tuples, Arc::new(MockModelReader::new(&inherited_model())));

    let tree = resolver
        .expand(&expand_request("document:doc1", "reader"))
        .await
        .unwrap()
        .tree;

    assert!(matches!(tree.root, ExpandNode::Difference { .. }));
    assert_eq!(tree.root.name(), "document:doc1#reader");
    assert_eq!(tree.subjects(), set(&["user:alice", "user:carol"]));
}

#[tokio::test]
async fn test_expand_marks_cycles_as_truncated() {
    let tuples = Arc::new(MockTupleReader::new());
    tuples.add("group:a", "member", "group:b#member").await;
    tuples.add("group:b", "member", "group:a#member").await;
    tuples.add("group:b", "member", "user:yan").await;
    let resolver = GraphResolver::new(tuples, Arc::new(MockModelReader::new(&group_model())));

    let result = resolver
        .expand(&expand_request("group:a", "member"))
        .await
        .unwrap();
    assert!(result.tree.root.is_truncated());
    assert!(result.resolution.cycle_detected);
    assert_eq!(result.tree.subjects(), set(&["user:yan"]));
}

#[tokio::test]
async fn test_expand_fails_past_depth_limit() {
    let tuples = Arc::new(MockTupleReader::new());
    for i in 0..40 {
        tuples
            .add(&format!("group:g{}", i), "member", &format!("group:g{}#member", i + 1))
            .await;
    }
    let resolver = GraphResolver::new(tuples, Arc::new(MockModelReader::new(&group_model())));

    let result = resolver.expand(&expand_request("group:g0", "member")).await;
    assert!(matches!(result, Err(DomainError::DepthExceeded { max_depth: 25 })));

    // One level only: no depth involved.
    let request = expand_request("group:g0", "member").with_mode(ExpandMode::Shallow);
    assert!(resolver.expand(&request).await.is_ok());
}

#[tokio::test]
async fn test_expand_rejects_unknown_relation() {
    let resolver = GraphResolver::new(
        Arc::new(MockTupleReader::new()),
        Arc::new(MockModelReader::new(&example_model())),
    );

    let result = resolver.expand(&expand_request("document:doc1", "approver")).await;
    assert!(matches!(result, Err(DomainError::RelationNotFound { .. })));
}

#[tokio::test]
async fn test_recursive_expand_reuses_cached_subtrees() {
    let tuples = inherited_tuples().await;
    let resolver = GraphResolver::with_config(
        Arc::clone(&tuples),
        Arc::new(MockModelReader::new(&inherited_model())),
        ResolverConfig::default().with_cache(Arc::new(QueryCache::new(QueryCacheConfig::default()))),
    );

    let first = resolver
        .expand(&expand_request("document:doc1", "viewer"))
        .await
        .unwrap();
    let second = resolver
        .expand(&expand_request("document:doc1", "viewer"))
        .await
        .unwrap();

    assert_eq!(first.tree, second.tree);
    assert_eq!(second.resolution.cache_hits, 1);
    assert_eq!(second.resolution.datastore_reads, 0);
}
