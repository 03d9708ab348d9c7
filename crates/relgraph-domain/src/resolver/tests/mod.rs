//! Tests for the graph resolver module.
//!
//! Organized by query:
//! - Check: direct grants, usersets, operators, safety limits, sharing
//! - Expand: shallow and recursive trees, cycles, depth
//! - ListObjects: reverse lookup and candidate checks


mod expand_tests;
