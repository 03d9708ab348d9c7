//! relgraph-engine: composition layer.
//!
//! Connects a `TupleStore` from relgraph-storage to the evaluator in
//! relgraph-domain and exposes one facade for embedding applications.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                 relgraph-engine                  │
//! ├──────────────────────────────────────────────────┤
//! │  engine.rs     - Engine facade (queries, writes) │
//! │  batch.rs      - Batch checks with dedup         │
//! │  registry.rs   - Versioned model registry        │
//! │  adapters.rs   - TupleStore -> TupleReader       │
//! │  config.rs     - Layered configuration           │
//! │  observability - Logging setup                   │
//! └──────────────────────────────────────────────────┘
//! ```

pub mod adapters;
pub mod batch;
pub mod config;
pub mod engine;
pub mod error;
pub mod observability;
pub mod registry;

// Re-exports for convenience
pub use batch::{
    BatchCheckItem, BatchCheckItemResult, BatchCheckRequest, BatchCheckResponse, MAX_BATCH_SIZE,
};
pub use config::{ConfigLoadError, EngineConfig};
pub use engine::Engine;
pub use error::{EngineError, EngineResult};
pub use registry::ModelRegistry;
