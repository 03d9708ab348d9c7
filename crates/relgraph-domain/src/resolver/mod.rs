//! Query evaluation over a compiled relation graph.
//!
//! The resolver answers three kinds of queries against a pinned model
//! version and a caller-supplied snapshot:
//!
//! - **Check**: does a subject hold a relation on an object?
//! - **Expand**: which subjects and usersets make up a relation on an object?
//! - **ListObjects**: which objects of a type does a subject hold a relation on?
//!
//! Tuples are read through [`TupleReader`], model versions through
//! [`ModelReader`]. Both are traits so the evaluator can run against any
//! backend; the reference in-memory store lives in `relgraph-storage`.
//!
//! # Safety limits
//!
//! - Every (object, relation) step counts one level of depth. Reaching
//!   `max_depth` fails the query with `DepthExceeded`.
//! - A whole query runs under a deadline (per request, or the configured
//!   default). On expiry every in-flight branch is dropped and the query
//!   fails with `DeadlineExceeded`.
//! - Instance-level cycles through tuples terminate: re-entering a pair
//!   on the same path yields "not granted" for that path.

mod config;
mod context;
mod expand;
mod graph_resolver;
mod list_objects;
mod traits;
mod types;

#[cfg(test)]
mod tests;

pub use config::ResolverConfig;
pub use graph_resolver::GraphResolver;
pub use traits::{ModelReader, SubjectFilter, TupleReader};
pub use types::{
    CheckRequest, CheckResult, ExpandLeaf, ExpandLeafValue, ExpandMode, ExpandNode, ExpandRequest,
    ExpandResult, ListObjectsRequest, ListObjectsResult, ResolutionMetadata, UsersetTree,
};
