//! Types for the graph resolver.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::error::{DomainError, DomainResult};
use crate::model::{ObjectRef, Snapshot, Subject, Tuple};

/// Request for a permission check.
#[derive(Debug, Clone)]
pub struct CheckRequest {
    /// The object being accessed (e.g., "document:readme").
    pub object: ObjectRef,
    /// The relation to check (e.g., "viewer").
    pub relation: String,
    /// The subject requesting access (e.g., "user:alice").
    pub subject: Subject,
    /// Snapshot every tuple read is pinned to.
    pub snapshot: Snapshot,
    /// Model version to evaluate against; `None` means the current one.
    pub model_id: Option<String>,
    /// Tuples visible only to this request.
    /// Wrapped in Arc for cheap cloning during graph traversal.
    pub contextual_tuples: Arc<Vec<Tuple>>,
    /// Overrides the configured deadline.
    pub timeout: Option<Duration>,
}

impl CheckRequest {
    /// Creates a check request against the current model.
    pub fn new(
        object: ObjectRef,
        relation: impl Into<String>,
        subject: Subject,
        snapshot: Snapshot,
    ) -> Self {
        Self {
            object,
            relation: relation.into(),
            subject,
            snapshot,
            model_id: None,
            contextual_tuples: Arc::new(Vec::new()),
            timeout: None,
        }
    }

    /// Parses a check request from text forms
    /// (`"document:doc1"`, `"viewer"`, `"user:alice"`).
    pub fn parse(
        object: &str,
        relation: &str,
        subject: &str,
        snapshot: Snapshot,
    ) -> DomainResult<Self> {
        let object = ObjectRef::parse(object).map_err(|_| DomainError::InvalidObjectFormat {
            value: object.to_string(),
        })?;
        let subject = Subject::parse(subject).map_err(|_| DomainError::InvalidSubjectFormat {
            value: subject.to_string(),
        })?;
        Ok(Self::new(object, relation, subject, snapshot))
    }

    /// Pins the request to a model version.
    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    /// Adds request-scoped tuples.
    pub fn with_contextual_tuples(mut self, tuples: Vec<Tuple>) -> Self {
        self.contextual_tuples = Arc::new(tuples);
        self
    }

    /// Overrides the deadline for this request.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Result of a permission check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    /// Whether the check is allowed.
    pub allowed: bool,
    /// How the answer was reached.
    pub resolution: ResolutionMetadata,
}

/// Statistics about one query evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResolutionMetadata {
    /// Deepest evaluation step reached, counting the root as 1.
    pub depth: u32,
    /// Number of tuple store reads issued.
    pub datastore_reads: u64,
    /// Sub-queries answered from the memo cache.
    pub cache_hits: u64,
    /// Sub-queries answered by joining another query's computation.
    pub dedup_joins: u64,
    /// Whether some path re-entered an (object, relation) pair.
    pub cycle_detected: bool,
}

/// Outcome of one evaluation step, before it is turned into a public result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Resolution {
    pub(crate) allowed: bool,
    /// Nested evaluation steps the decisive branches went through.
    pub(crate) height: u32,
    /// A cycle was cut on a decisive branch, so the outcome depends on
    /// the path that produced it.
    pub(crate) cycle_cut: bool,
}

impl Resolution {
    pub(crate) const fn new(allowed: bool) -> Self {
        Self {
            allowed,
            height: 0,
            cycle_cut: false,
        }
    }

    pub(crate) const fn cycle() -> Self {
        Self {
            allowed: false,
            height: 1,
            cycle_cut: true,
        }
    }
}

// ============================================================
// Expand API Types
// ============================================================

/// How far an expansion follows indirect references.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExpandMode {
    /// One level: userset references, computed relations and related
    /// objects are listed but not expanded.
    Shallow,
    /// Follow every reference down to concrete subjects.
    #[default]
    Recursive,
}

/// Request for expanding a relation tree.
#[derive(Debug, Clone)]
pub struct ExpandRequest {
    /// The object to expand (e.g., "document:readme").
    pub object: ObjectRef,
    /// The relation to expand (e.g., "viewer").
    pub relation: String,
    /// Snapshot every tuple read is pinned to.
    pub snapshot: Snapshot,
    /// Model version to evaluate against; `None` means the current one.
    pub model_id: Option<String>,
    /// Expansion depth mode.
    pub mode: ExpandMode,
    /// Overrides the configured deadline.
    pub timeout: Option<Duration>,
}

impl ExpandRequest {
    /// Creates a recursive expand request against the current model.
    pub fn new(object: ObjectRef, relation: impl Into<String>, snapshot: Snapshot) -> Self {
        Self {
            object,
            relation: relation.into(),
            snapshot,
            model_id: None,
            mode: ExpandMode::default(),
            timeout: None,
        }
    }

    /// Pins the request to a model version.
    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    /// Sets the expansion mode.
    pub fn with_mode(mut self, mode: ExpandMode) -> Self {
        self.mode = mode;
        self
    }

    /// Overrides the deadline for this request.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Result of expanding a relation tree.
#[derive(Debug, Clone)]
pub struct ExpandResult {
    /// The expansion tree showing how subjects relate to the object.
    pub tree: UsersetTree,
    /// How the tree was built.
    pub resolution: ResolutionMetadata,
}

/// A tree structure representing the expansion of a relation.
#[derive(Debug, Clone, PartialEq)]
pub struct UsersetTree {
    /// The root node of the expansion tree.
    pub root: ExpandNode,
}

impl UsersetTree {
    /// Concrete subjects (and wildcards) the tree grants the relation to.
    ///
    /// Applies the tree's set algebra. Shallow trees leave references
    /// unexpanded, so the set only covers subjects stored directly.
    pub fn subjects(&self) -> BTreeSet<String> {
        self.root.subjects()
    }
}

/// A node in the expansion tree. Every node is named `type:id#relation`.
#[derive(Debug, Clone, PartialEq)]
pub enum ExpandNode {
    /// A leaf node.
    Leaf(ExpandLeaf),
    /// A union of child nodes (any child grants access).
    Union {
        /// Name of this union node.
        name: String,
        /// Child nodes in the union.
        nodes: Vec<ExpandNode>,
    },
    /// An intersection of child nodes (all children must grant access).
    Intersection {
        /// Name of this intersection node.
        name: String,
        /// Child nodes in the intersection.
        nodes: Vec<ExpandNode>,
    },
    /// A difference (exclusion) of nodes (base minus subtract).
    Difference {
        /// Name of this difference node.
        name: String,
        /// The base node.
        base: Box<ExpandNode>,
        /// The node to subtract from base.
        subtract: Box<ExpandNode>,
    },
}

impl ExpandNode {
    /// Returns the name of this node.
    pub fn name(&self) -> &str {
        match self {
            ExpandNode::Leaf(leaf) => &leaf.name,
            ExpandNode::Union { name, .. } => name,
            ExpandNode::Intersection { name, .. } => name,
            ExpandNode::Difference { name, .. } => name,
        }
    }

    /// Whether a cycle was cut somewhere under this node.
    pub fn is_truncated(&self) -> bool {
        match self {
            ExpandNode::Leaf(leaf) => match &leaf.value {
                ExpandLeafValue::Truncated => true,
                ExpandLeafValue::Subjects { expanded, .. }
                | ExpandLeafValue::TupleToUserset { expanded, .. } => {
                    expanded.iter().any(ExpandNode::is_truncated)
                }
                ExpandLeafValue::Computed { expanded, .. } => {
                    expanded.as_deref().is_some_and(ExpandNode::is_truncated)
                }
            },
            ExpandNode::Union { nodes, .. } | ExpandNode::Intersection { nodes, .. } => {
                nodes.iter().any(ExpandNode::is_truncated)
            }
            ExpandNode::Difference { base, subtract, .. } => {
                base.is_truncated() || subtract.is_truncated()
            }
        }
    }

    fn subjects(&self) -> BTreeSet<String> {
        match self {
            ExpandNode::Leaf(leaf) => match &leaf.value {
                ExpandLeafValue::Subjects { subjects, expanded } => subjects
                    .iter()
                    .filter(|s| !s.contains('#'))
                    .cloned()
                    .chain(expanded.iter().flat_map(ExpandNode::subjects))
                    .collect(),
                ExpandLeafValue::Computed { expanded, .. } => expanded
                    .as_deref()
                    .map(ExpandNode::subjects)
                    .unwrap_or_default(),
                ExpandLeafValue::TupleToUserset { expanded, .. } => {
                    expanded.iter().flat_map(ExpandNode::subjects).collect()
                }
                ExpandLeafValue::Truncated => BTreeSet::new(),
            },
            ExpandNode::Union { nodes, .. } => nodes.iter().flat_map(ExpandNode::subjects).collect(),
            ExpandNode::Intersection { nodes, .. } => {
                let mut sets = nodes.iter().map(ExpandNode::subjects);
                let first = sets.next().unwrap_or_default();
                sets.fold(first, |acc, set| acc.intersection(&set).cloned().collect())
            }
            ExpandNode::Difference { base, subtract, .. } => {
                let removed = subtract.subjects();
                base.subjects()
                    .into_iter()
                    .filter(|s| !removed.contains(s))
                    .collect()
            }
        }
    }
}

/// A leaf node in the expansion tree.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpandLeaf {
    /// Name of this leaf node.
    pub name: String,
    /// The type of leaf content.
    pub value: ExpandLeafValue,
}

/// The value of a leaf node.
#[derive(Debug, Clone, PartialEq)]
pub enum ExpandLeafValue {
    /// Subjects stored directly on the relation, including userset
    /// references and wildcards. In recursive mode `expanded` holds the
    /// expansion of each userset reference, in order.
    Subjects {
        subjects: Vec<String>,
        expanded: Vec<ExpandNode>,
    },
    /// A computed userset reference on the same object.
    Computed {
        userset: String,
        expanded: Option<Box<ExpandNode>>,
    },
    /// A tuple-to-userset reference with the objects it reached.
    TupleToUserset {
        tupleset: String,
        computed_userset: String,
        related: Vec<String>,
        expanded: Vec<ExpandNode>,
    },
    /// The (object, relation) pair is already being expanded on this path.
    Truncated,
}

// ============================================================
// ListObjects API Types
// ============================================================

/// Request for listing objects accessible to a subject.
#[derive(Debug, Clone)]
pub struct ListObjectsRequest {
    /// The object type to list (e.g., "document").
    pub object_type: String,
    /// The relation to check (e.g., "viewer").
    pub relation: String,
    /// The subject to check permissions for.
    pub subject: Subject,
    /// Snapshot every tuple read is pinned to.
    pub snapshot: Snapshot,
    /// Model version to evaluate against; `None` means the current one.
    pub model_id: Option<String>,
    /// Tuples visible only to this request.
    pub contextual_tuples: Arc<Vec<Tuple>>,
    /// Maximum number of objects to return.
    pub max_results: Option<usize>,
    /// Overrides the configured deadline.
    pub timeout: Option<Duration>,
}

impl ListObjectsRequest {
    /// Creates a new request without contextual tuples or a result cap.
    pub fn new(
        object_type: impl Into<String>,
        relation: impl Into<String>,
        subject: Subject,
        snapshot: Snapshot,
    ) -> Self {
        Self {
            object_type: object_type.into(),
            relation: relation.into(),
            subject,
            snapshot,
            model_id: None,
            contextual_tuples: Arc::new(Vec::new()),
            max_results: None,
            timeout: None,
        }
    }

    /// Pins the request to a model version.
    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    /// Adds request-scoped tuples.
    pub fn with_contextual_tuples(mut self, tuples: Vec<Tuple>) -> Self {
        self.contextual_tuples = Arc::new(tuples);
        self
    }

    /// Caps the number of returned objects.
    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = Some(max_results);
        self
    }

    /// Overrides the deadline for this request.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Result of listing objects accessible to a subject.
#[derive(Debug, Clone)]
pub struct ListObjectsResult {
    /// Objects the subject has the relation to, ordered by id.
    pub objects: Vec<ObjectRef>,
    /// Whether more objects matched than the result cap allowed.
    pub truncated: bool,
    /// How the list was computed.
    pub resolution: ResolutionMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subjects_leaf(name: &str, subjects: &[&str]) -> ExpandNode {
        ExpandNode::Leaf(ExpandLeaf {
            name: name.to_string(),
            value: ExpandLeafValue::Subjects {
                subjects: subjects.iter().map(|s| s.to_string()).collect(),
                expanded: vec![],
            },
        })
    }

    #[test]
    fn test_check_request_parse_rejects_bad_forms() {
        let snapshot = Snapshot::new(1);
        assert!(CheckRequest::parse("document:d", "viewer", "user:a", snapshot).is_ok());
        assert!(matches!(
            CheckRequest::parse("document", "viewer", "user:a", snapshot),
            Err(DomainError::InvalidObjectFormat { .. })
        ));
        assert!(matches!(
            CheckRequest::parse("document:d", "viewer", "alice", snapshot),
            Err(DomainError::InvalidSubjectFormat { .. })
        ));
    }

    #[test]
    fn test_tree_subjects_apply_set_algebra() {
        let tree = UsersetTree {
            root: ExpandNode::Difference {
                name: "document:d#can_view".to_string(),
                base: Box::new(ExpandNode::Union {
                    name: "document:d#can_view".to_string(),
                    nodes: vec![
                        subjects_leaf("document:d#viewer", &["user:a", "domain:x#member"]),
                        subjects_leaf("document:d#editor", &["user:b", "user:c"]),
                    ],
                }),
                subtract: Box::new(ExpandNode::Intersection {
                    name: "document:d#can_view".to_string(),
                    nodes: vec![
                        subjects_leaf("document:d#blocked", &["user:b", "user:c"]),
                        subjects_leaf("document:d#flagged", &["user:c"]),
                    ],
                }),
            },
        };

        let subjects: Vec<_> = tree.subjects().into_iter().collect();
        assert_eq!(subjects, vec!["user:a", "user:b"]);
        assert!(!tree.root.is_truncated());
    }

    #[test]
    fn test_truncated_leaf_contributes_nothing() {
        let node = ExpandNode::Leaf(ExpandLeaf {
            name: "group:g#member".to_string(),
            value: ExpandLeafValue::Computed {
                userset: "group:g#owner".to_string(),
                expanded: Some(Box::new(ExpandNode::Leaf(ExpandLeaf {
                    name: "group:g#owner".to_string(),
                    value: ExpandLeafValue::Truncated,
                }))),
            },
        });
        assert!(node.is_truncated());
        assert!(node.subjects().is_empty());
    }
}
