//! relgraph-domain: relationship graph evaluation core
//!
//! This crate contains the evaluation logic:
//! - Model description types and the model compiler
//! - The compiled type registry and relation expressions
//! - Graph resolver for Check, Expand and ListObjects
//! - Sub-query memoization and in-flight deduplication
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               relgraph-domain               │
//! ├─────────────────────────────────────────────┤
//! │  model/      - Descriptions, compiler       │
//! │  resolver/   - Graph evaluation             │
//! │  cache/      - Memo cache & singleflight    │
//! └─────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod error;
pub mod model;
pub mod resolver;

// Re-export commonly used types at the crate root
pub use cache::{CacheKey, QueryCache, QueryCacheConfig};
pub use error::{CompileError, CompileResult, DomainError, DomainResult};
pub use model::{compile, ObjectRef, Snapshot, Subject, Tuple, TypeRegistry};
pub use resolver::{GraphResolver, ModelReader, ResolverConfig, TupleReader};
