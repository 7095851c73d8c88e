//! Parking contexts against host objects for asynchronous continuation.
//!
//! Instrumentation at a hand-off point (executor submission, callback
//! registration) parks the current node against the object being handed
//! off. Whichever thread later runs that object resumes the node and makes
//! it ambient there.

use super::registry::{self, AttachToken};
use super::ContextNode;
use dashmap::DashMap;
use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Stores between two automatic sweeps of dead entries.
const PURGE_INTERVAL: usize = 64;

struct Parked {
    host: Weak<dyn Any + Send + Sync>,
    node: Arc<ContextNode>,
    invalidate_on_restore: bool,
}

impl Parked {
    fn is_alive(&self) -> bool {
        self.host.strong_count() > 0
    }
}

/// Concurrent table of parked contexts, weakly keyed by host object.
///
/// An entry never keeps its host alive. Entries whose host has been dropped
/// are ignored by [`ContinuationTable::resume`] and reclaimed by
/// [`ContinuationTable::purge`], which also runs periodically from
/// [`ContinuationTable::store`].
#[derive(Default)]
pub struct ContinuationTable {
    entries: DashMap<usize, Parked>,
    stores: AtomicUsize,
}

fn host_key<H: ?Sized>(host: &Arc<H>) -> usize {
    Arc::as_ptr(host).cast::<()>() as usize
}

impl ContinuationTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parks `node` against `host`, replacing any node already parked there.
    ///
    /// With `invalidate_on_restore` the entry is consumed by the first
    /// resume; otherwise it stays resumable until cleared or the host dies.
    pub fn store<H>(&self, host: &Arc<H>, node: Arc<ContextNode>, invalidate_on_restore: bool)
    where
        H: Any + Send + Sync,
    {
        let erased: Arc<dyn Any + Send + Sync> = Arc::clone(host) as Arc<dyn Any + Send + Sync>;
        self.entries.insert(
            host_key(host),
            Parked {
                host: Arc::downgrade(&erased),
                node,
                invalidate_on_restore,
            },
        );
        if self.stores.fetch_add(1, Ordering::Relaxed) % PURGE_INTERVAL == PURGE_INTERVAL - 1 {
            self.purge();
        }
    }

    /// Makes the node parked against `host` ambient on this thread.
    ///
    /// Returns the node and the token that undoes the attach, or `None` if
    /// nothing is parked (never stored, already consumed, or cleared).
    pub fn resume<H>(&self, host: &Arc<H>) -> Option<(Arc<ContextNode>, AttachToken)>
    where
        H: Any + Send + Sync,
    {
        let node = self.take_or_peek(host_key(host))?;
        let token = registry::attach(Arc::clone(&node));
        Some((node, token))
    }

    /// Returns the node parked against `host` without attaching or consuming it.
    pub fn peek<H>(&self, host: &Arc<H>) -> Option<Arc<ContextNode>>
    where
        H: Any + Send + Sync,
    {
        let entry = self.entries.get(&host_key(host))?;
        entry.is_alive().then(|| Arc::clone(&entry.node))
    }

    /// Removes whatever is parked against `host`.
    pub fn clear<H>(&self, host: &Arc<H>) -> Option<Arc<ContextNode>>
    where
        H: Any + Send + Sync,
    {
        self.entries
            .remove(&host_key(host))
            .map(|(_, parked)| parked.node)
    }

    /// Drops every entry whose host no longer exists.
    pub fn purge(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, parked| parked.is_alive());
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(removed, "Purged parked contexts of dropped hosts");
        }
        removed
    }

    /// Returns the number of entries, including not yet purged dead ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the table holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn take_or_peek(&self, key: usize) -> Option<Arc<ContextNode>> {
        // Single-use entries are removed atomically so concurrent resumes
        // cannot both obtain them.
        if let Some((_, parked)) = self.entries.remove_if(&key, |_, p| p.invalidate_on_restore) {
            return parked.is_alive().then_some(parked.node);
        }
        let entry = self.entries.get(&key)?;
        if entry.is_alive() {
            return Some(Arc::clone(&entry.node));
        }
        drop(entry);
        self.entries.remove_if(&key, |_, p| !p.is_alive());
        None
    }
}

impl std::fmt::Debug for ContinuationTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContinuationTable")
            .field("entries", &self.entries.len())
            .finish()
    }
}
