//! Batch permission checks.
//!
//! A batch evaluates many checks at one snapshot against one model version.
//! Identical items run once and share their result; distinct items run with
//! bounded concurrency. A failing item reports its error in place and does
//! not fail the rest of the batch.

use std::collections::HashMap;

use futures::stream::{self, StreamExt};
use tracing::debug;

use relgraph_domain::error::{DomainError, DomainResult};
use relgraph_domain::model::{ObjectRef, Snapshot, Subject};
use relgraph_domain::resolver::{CheckRequest, GraphResolver, ModelReader, TupleReader};

use crate::error::{EngineError, EngineResult};

/// Maximum number of checks per batch.
pub const MAX_BATCH_SIZE: usize = 50;

/// A single check within a batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BatchCheckItem {
    pub object: ObjectRef,
    pub relation: String,
    pub subject: Subject,
}

impl BatchCheckItem {
    pub fn new(object: ObjectRef, relation: impl Into<String>, subject: Subject) -> Self {
        Self {
            object,
            relation: relation.into(),
            subject,
        }
    }

    /// Parses an item from text forms (`"document:doc1"`, `"viewer"`, `"user:alice"`).
    pub fn parse(object: &str, relation: &str, subject: &str) -> DomainResult<Self> {
        let request = CheckRequest::parse(object, relation, subject, Snapshot::ZERO)?;
        Ok(Self::new(request.object, request.relation, request.subject))
    }
}

/// Request for batch permission checks.
#[derive(Debug, Clone)]
pub struct BatchCheckRequest {
    pub items: Vec<BatchCheckItem>,
    pub snapshot: Snapshot,
    /// Model version; `None` resolves the current one once for the whole batch.
    pub model_id: Option<String>,
}

impl BatchCheckRequest {
    pub fn new(items: Vec<BatchCheckItem>, snapshot: Snapshot) -> Self {
        Self {
            items,
            snapshot,
            model_id: None,
        }
    }

    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    /// Rejects empty and oversized batches.
    pub fn validate(&self) -> EngineResult<()> {
        if self.items.is_empty() {
            return Err(EngineError::EmptyBatch);
        }
        if self.items.len() > MAX_BATCH_SIZE {
            return Err(EngineError::BatchTooLarge {
                size: self.items.len(),
                max: MAX_BATCH_SIZE,
            });
        }
        Ok(())
    }
}

/// Result of a single check within a batch.
#[derive(Debug, Clone)]
pub struct BatchCheckItemResult {
    /// Whether the check is allowed; `false` whenever `error` is set.
    pub allowed: bool,
    pub error: Option<DomainError>,
}

impl From<DomainResult<bool>> for BatchCheckItemResult {
    fn from(result: DomainResult<bool>) -> Self {
        match result {
            Ok(allowed) => Self {
                allowed,
                error: None,
            },
            Err(error) => Self {
                allowed: false,
                error: Some(error),
            },
        }
    }
}

/// Response from a batch check, in request order.
#[derive(Debug, Clone)]
pub struct BatchCheckResponse {
    pub results: Vec<BatchCheckItemResult>,
    /// Number of distinct checks actually evaluated.
    pub unique_checks: usize,
}

/// Evaluates a validated batch against a fixed model version.
pub(crate) async fn run<T, M>(
    resolver: &GraphResolver<T, M>,
    model_id: &str,
    request: &BatchCheckRequest,
) -> BatchCheckResponse
where
    T: TupleReader + 'static,
    M: ModelReader + 'static,
{
    let mut unique: Vec<&BatchCheckItem> = Vec::new();
    let mut index_of: HashMap<&BatchCheckItem, usize> = HashMap::new();
    let positions: Vec<usize> = request
        .items
        .iter()
        .map(|item| {
            *index_of.entry(item).or_insert_with(|| {
                unique.push(item);
                unique.len() - 1
            })
        })
        .collect();

    debug!(
        total = request.items.len(),
        unique = unique.len(),
        "deduplicated batch"
    );

    let outcomes: Vec<BatchCheckItemResult> = stream::iter(unique.iter())
        .map(|item| async move {
            let check = CheckRequest::new(
                item.object.clone(),
                item.relation.clone(),
                item.subject.clone(),
                request.snapshot,
            )
            .with_model_id(model_id);
            BatchCheckItemResult::from(resolver.check(&check).await.map(|result| result.allowed))
        })
        .buffered(resolver.config().max_concurrency)
        .collect()
        .await;

    BatchCheckResponse {
        results: positions.iter().map(|&i| outcomes[i].clone()).collect(),
        unique_checks: unique.len(),
    }
}
