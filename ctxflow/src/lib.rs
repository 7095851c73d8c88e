//! # Ctxflow
//!
//! An in-process context propagation engine for APM instrumentation.
//!
//! Instrumentation hooks open a [`context::ContextNode`] per monitored
//! invocation. Nodes carry key/value data whose flow is governed by a
//! [`policy::PropagationPolicy`]:
//!
//! - **Down-propagation**: values flow from a node to the children it spawns
//! - **Up-propagation**: values set by a synchronous child flow back to its
//!   parent when the child closes
//! - **Wire propagation**: allow-listed values cross process boundaries as
//!   baggage headers, alongside a span context in W3C, B3 or Datadog format
//! - **Tag bridging**: tag data is mirrored into an external dimensional
//!   tagging facility
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ctxflow::prelude::*;
//!
//! let engine = ContextEngine::new(&EngineConfig::from_json_str(config_json)?);
//!
//! let node = engine.enter();
//! engine.read_down_propagation_headers(&node, &incoming_headers)?;
//! node.make_active()?;
//!
//! let outgoing = engine.down_propagation_headers(&node, None)?;
//! node.close()?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod codec;
pub mod context;
pub mod engine;
pub mod errors;
pub mod policy;
pub mod tags;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::codec::{
        set_trace_format, trace_format, Decoded, HeaderCodec, HeaderMap, SpanContext,
        SpanContextPropagator, TraceFormat,
    };
    pub use crate::context::{
        registry, AmbientScope, AttachToken, ContextNode, ContinuationTable, DataValue, Phase,
    };
    pub use crate::engine::{ContextEngine, EngineConfig};
    pub use crate::errors::{ConfigError, ContextError, CtxflowError};
    pub use crate::policy::{
        DataSettings, DownMode, PropagationPolicy, PropagationSettings, UpMode,
    };
    pub use crate::tags::{LoggingTagBridge, NoOpTagBridge, TagBridge, TagScope, TagSet};
}
