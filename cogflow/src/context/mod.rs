//! Context management for pipeline execution.
//!
//! This module provides:
//! - `ContextMap`, the insertion-ordered key/value payload handed to nodes
//! - `ExecutionContext`, which accumulates stage outputs over a run

mod execution;

pub use execution::{context_from_pairs, ContextMap, ExecutionContext};
