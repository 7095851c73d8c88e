//! An in-memory tagging facility.

use crate::tags::{TagBridge, TagScope, TagSet};
use parking_lot::Mutex;
use std::sync::Arc;

/// Something that happened to the recorded facility.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagEvent {
    /// A scope with these tags was opened.
    Opened(TagSet),
    /// The innermost scope was closed.
    Closed,
}

#[derive(Debug, Default)]
struct Facility {
    stack: Vec<TagSet>,
    events: Vec<TagEvent>,
}

/// A tag bridge backed by an in-memory scope stack.
///
/// The facility's ambient tags are whatever the innermost open scope holds;
/// [`RecordingTagBridge::with_ambient`] seeds a base scope to simulate tags
/// set by the application before the engine saw the request.
#[derive(Debug, Clone, Default)]
pub struct RecordingTagBridge {
    facility: Arc<Mutex<Facility>>,
}

impl RecordingTagBridge {
    /// Creates a bridge with no ambient tags.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a bridge whose facility already has these tags ambient.
    #[must_use]
    pub fn with_ambient(tags: TagSet) -> Self {
        let bridge = Self::new();
        bridge.facility.lock().stack.push(tags);
        bridge
    }

    /// Returns every open/close seen so far.
    #[must_use]
    pub fn events(&self) -> Vec<TagEvent> {
        self.facility.lock().events.clone()
    }

    /// Returns the number of scopes opened through the bridge.
    #[must_use]
    pub fn opened_count(&self) -> usize {
        self.facility
            .lock()
            .events
            .iter()
            .filter(|e| matches!(e, TagEvent::Opened(_)))
            .count()
    }
}

struct RecordingScope {
    facility: Arc<Mutex<Facility>>,
}

impl TagScope for RecordingScope {
    fn close(self: Box<Self>) {
        let mut facility = self.facility.lock();
        facility.stack.pop();
        facility.events.push(TagEvent::Closed);
    }
}

impl TagBridge for RecordingTagBridge {
    fn current_tags(&self) -> TagSet {
        self.facility.lock().stack.last().cloned().unwrap_or_default()
    }

    fn open_scope(&self, tags: TagSet) -> Box<dyn TagScope> {
        let mut facility = self.facility.lock();
        facility.events.push(TagEvent::Opened(tags.clone()));
        facility.stack.push(tags);
        Box::new(RecordingScope {
            facility: Arc::clone(&self.facility),
        })
    }
}
