//! Propagation mode enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How a value flows from a context to the contexts created beneath it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownMode {
    /// The value stays in the context that wrote it.
    #[default]
    None,
    /// The value is inherited by child contexts within this process.
    ProcessLocal,
}

impl DownMode {
    /// Returns true if the value is inherited by children.
    #[must_use]
    pub fn is_propagated(self) -> bool {
        self != Self::None
    }
}

/// How a value flows from a closing child back into its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpMode {
    /// The value is discarded when the child closes.
    #[default]
    None,
    /// The value is written into the parent on close.
    ProcessLocal,
    /// Like `ProcessLocal`, and also carried in up-propagation headers.
    Global,
}

impl UpMode {
    /// Returns true if the value is written into the parent on close.
    #[must_use]
    pub fn is_propagated(self) -> bool {
        self != Self::None
    }

    /// Returns true if the value travels over the wire in responses.
    #[must_use]
    pub fn is_global(self) -> bool {
        self == Self::Global
    }
}

impl fmt::Display for DownMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::ProcessLocal => write!(f, "process_local"),
        }
    }
}

impl fmt::Display for UpMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::ProcessLocal => write!(f, "process_local"),
            Self::Global => write!(f, "global"),
        }
    }
}
