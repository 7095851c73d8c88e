//! Context propagation through nested invocations.
//!
//! This module provides:
//! - The per-invocation [`ContextNode`] and its lifecycle
//! - The per-thread ambient slot with attach/detach tokens
//! - A weakly keyed table for parking contexts across thread hand-offs

#[cfg(test)]
mod context_tests;
mod continuation;
mod node;
pub mod registry;
mod value;

pub use continuation::ContinuationTable;
pub use node::{ContextNode, DataMap, Phase, REMOTE_PARENT_SPAN_CONTEXT_KEY};
pub use registry::{AmbientScope, AttachToken};
pub use value::DataValue;
