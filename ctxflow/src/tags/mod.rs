//! Bridge to an external dimensional tagging facility.
//!
//! The engine stays the source of truth for tag values. A [`TagBridge`]
//! only reads the facility's ambient tags when a root context is created
//! and republishes tag data as a new ambient scope when a context changes it.

use std::fmt;
use tracing::{debug, info, trace, Level};

/// Tag key/value pairs, ordered by key.
pub type TagSet = Vec<(String, String)>;

/// An ambient tag scope opened in the external facility.
pub trait TagScope: Send {
    /// Restores the facility's previous ambient tags.
    fn close(self: Box<Self>);
}

/// Two-way bridge to a tagging facility used by the metrics subsystem.
#[cfg_attr(test, mockall::automock)]
pub trait TagBridge: Send + Sync {
    /// Returns the tags currently ambient in the facility.
    fn current_tags(&self) -> TagSet;

    /// Makes exactly `tags` ambient until the returned scope is closed.
    fn open_scope(&self, tags: TagSet) -> Box<dyn TagScope>;
}

/// A scope that does nothing on close.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpTagScope;

impl TagScope for NoOpTagScope {
    fn close(self: Box<Self>) {}
}

/// A bridge to no facility at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpTagBridge;

impl TagBridge for NoOpTagBridge {
    fn current_tags(&self) -> TagSet {
        TagSet::new()
    }

    fn open_scope(&self, _tags: TagSet) -> Box<dyn TagScope> {
        Box::new(NoOpTagScope)
    }
}

/// A bridge that only logs the scopes it would open.
#[derive(Debug, Clone)]
pub struct LoggingTagBridge {
    level: Level,
}

impl Default for LoggingTagBridge {
    fn default() -> Self {
        Self { level: Level::DEBUG }
    }
}

impl LoggingTagBridge {
    /// Creates a logging bridge with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }
}

struct LoggingTagScope {
    level: Level,
    tags: TagSet,
}

fn log_tags(level: Level, action: &str, tags: &TagSet) {
    match level {
        Level::TRACE => {
            trace!(action = %action, ?tags, "Tag scope");
        }
        Level::DEBUG => {
            debug!(action = %action, ?tags, "Tag scope");
        }
        _ => {
            info!(action = %action, ?tags, "Tag scope");
        }
    }
}

impl TagScope for LoggingTagScope {
    fn close(self: Box<Self>) {
        log_tags(self.level, "close", &self.tags);
    }
}

impl TagBridge for LoggingTagBridge {
    fn current_tags(&self) -> TagSet {
        TagSet::new()
    }

    fn open_scope(&self, tags: TagSet) -> Box<dyn TagScope> {
        log_tags(self.level, "open", &tags);
        Box::new(LoggingTagScope {
            level: self.level,
            tags,
        })
    }
}

impl fmt::Debug for dyn TagBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TagBridge")
    }
}
