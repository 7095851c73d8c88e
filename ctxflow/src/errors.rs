//! Error types for the ctxflow engine.
//!
//! Only protocol violations and configuration problems surface as errors.
//! Malformed wire data is recovered from inside the codec and never reaches
//! the caller.

use std::fmt;
use thiserror::Error;

use crate::context::Phase;

/// The main error type for ctxflow operations.
#[derive(Debug, Error)]
pub enum CtxflowError {
    /// A context lifecycle rule was violated by the caller.
    #[error("{0}")]
    Context(#[from] ContextError),

    /// The engine configuration could not be loaded.
    #[error("{0}")]
    Config(#[from] ConfigError),
}

/// Misuse of a context node or of the ambient registry.
///
/// These indicate a bug in the instrumentation layer driving the engine,
/// not a problem with the monitored application's data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    /// The node has already been closed.
    #[error("context {node_id} is closed")]
    Closed {
        /// Id of the closed node.
        node_id: u64,
    },

    /// The operation is not legal in the node's current phase.
    #[error("context {node_id} is in phase {actual}, expected {expected}")]
    InvalidPhase {
        /// Id of the node.
        node_id: u64,
        /// Phase(s) in which the operation is legal.
        expected: PhaseSet,
        /// The phase the node is actually in.
        actual: Phase,
    },

    /// A detach token does not match the top of this thread's ambient stack.
    #[error("detach out of order: token for context {attached} but ambient is {ambient:?}")]
    DetachMismatch {
        /// The node the token attached.
        attached: u64,
        /// The node currently ambient on this thread, if any.
        ambient: Option<u64>,
    },

    /// A detach token was used on a thread other than the one that attached it.
    #[error("detach on a different thread than the matching attach")]
    WrongThread,
}

impl ContextError {
    /// Creates an invalid-phase error.
    #[must_use]
    pub fn invalid_phase(node_id: u64, expected: PhaseSet, actual: Phase) -> Self {
        if actual == Phase::Closed {
            return Self::Closed { node_id };
        }
        Self::InvalidPhase {
            node_id,
            expected,
            actual,
        }
    }
}

/// A small set of phases, used for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseSet(&'static [Phase]);

impl PhaseSet {
    /// Only the entry phase.
    pub const ENTRY: Self = Self(&[Phase::Entry]);
    /// Only the active phase.
    pub const ACTIVE: Self = Self(&[Phase::Active]);
    /// Active or exit phase.
    pub const OPEN: Self = Self(&[Phase::Active, Phase::Exit]);
    /// Any phase but closed.
    pub const NOT_CLOSED: Self = Self(&[Phase::Entry, Phase::Active, Phase::Exit]);

    /// Returns true if the phase is in the set.
    #[must_use]
    pub fn contains(self, phase: Phase) -> bool {
        self.0.contains(&phase)
    }
}

impl fmt::Display for PhaseSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        write!(f, "{}", names.join("|"))
    }
}

/// Error raised while loading engine configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration document could not be parsed.
    #[error("Invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// An unknown trace propagation format was named.
    #[error("Unknown trace format: {0}")]
    UnknownTraceFormat(String),
}

/// Convenience result alias.
pub type Result<T, E = CtxflowError> = std::result::Result<T, E>;
