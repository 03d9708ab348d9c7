//! relgraph-storage: Snapshot-versioned tuple storage
//!
//! This crate provides the tuple store the engine reads through:
//! - TupleStore trait for revisioned writes and snapshot reads
//! - In-memory MVCC implementation
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              relgraph-storage               │
//! ├─────────────────────────────────────────────┤
//! │  traits.rs   - TupleStore trait definition  │
//! │  memory.rs   - In-memory implementation     │
//! └─────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod memory;
pub mod traits;

// Re-export commonly used types
pub use error::{StorageError, StorageResult};
pub use memory::MemoryTupleStore;
pub use traits::{validate_tuple, StoredTuple, TupleFilter, TupleStore, WILDCARD_ID};
