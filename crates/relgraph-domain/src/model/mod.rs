//! Model description types and the model compiler.
//!
//! This module contains:
//! - Core type definitions (ObjectRef, Subject, Tuple, Snapshot)
//! - The structured model description consumed by the compiler
//! - The compiled relation expressions and the immutable type registry

mod compiler;
mod expression;
mod registry;
mod types;
#[cfg(test)]
mod types_proptest;

pub use compiler::compile;
pub use expression::{CompiledRelation, Expression};
pub use registry::{CompiledType, TypeRegistry};
pub use types::*;
