//! The per-invocation context node and its lifecycle.

use super::registry::{self, AttachToken};
use super::DataValue;
use crate::codec::{HeaderCodec, HeaderMap, SpanContext};
use crate::errors::{ContextError, PhaseSet};
use crate::policy::PropagationPolicy;
use crate::tags::{TagBridge, TagScope, TagSet};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use tracing::{debug, warn};

/// Reserved key under which a decoded remote parent span context is stored.
pub const REMOTE_PARENT_SPAN_CONTEXT_KEY: &str = "remote_parent_span_context";

/// Immutable key/value snapshot shared between a node and its children.
pub type DataMap = HashMap<String, DataValue>;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle phase of a [`ContextNode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Created; the entry hooks are populating data.
    Entry,
    /// Ambient on its thread while the method body runs.
    Active,
    /// The exit hooks are running.
    Exit,
    /// Terminal.
    Closed,
}

impl Phase {
    /// Returns true in the active and exit phases.
    #[must_use]
    pub fn is_open(self) -> bool {
        matches!(self, Self::Active | Self::Exit)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Entry => "ENTRY",
            Self::Active => "ACTIVE",
            Self::Exit => "EXIT",
            Self::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

struct NodeState {
    phase: Phase,
    parent: Option<Weak<ContextNode>>,
    /// Down-propagated data received at construction. Never mutated.
    inherited: Arc<DataMap>,
    /// Down-propagated data as it stood when the entry phase ended; what
    /// asynchronous children inherit. Equals `inherited` until `make_active`.
    post_entry: Arc<DataMap>,
    /// Local writes. `None` is a tombstone.
    overwrites: HashMap<String, Option<DataValue>>,
    /// What the next synchronous child inherits.
    cached_child: Option<Arc<DataMap>>,
    ambient: Option<AttachToken>,
    tag_scope: Option<Box<dyn TagScope>>,
}

/// The data scope of one method invocation.
///
/// Nodes form a tree through non-owning parent references. A child created
/// on its parent's thread while the parent is open is *synchronous*: it
/// shares the parent's memoised child snapshot and writes its up-propagated
/// data back into the parent on close. Every other child is *asynchronous*:
/// it sees the parent's data as of the end of the parent's entry phase and
/// never writes back.
///
/// The mutable state sits behind a mutex, but every writer is either the
/// opening thread or a synchronous child closing on that same thread, so
/// the lock is never contended in practice.
pub struct ContextNode {
    id: u64,
    policy: Arc<PropagationPolicy>,
    opening_thread: ThreadId,
    synchronous: bool,
    bridge: Option<Arc<dyn TagBridge>>,
    state: Mutex<NodeState>,
}

impl ContextNode {
    /// Creates a node in the entry phase.
    ///
    /// Children take their parent's policy; `policy` applies to roots only.
    #[must_use]
    pub fn enter(parent: Option<&Arc<Self>>, policy: &Arc<PropagationPolicy>) -> Arc<Self> {
        Self::enter_with_bridge(parent, policy, None)
    }

    /// Creates a node in the entry phase, bridging tags to an external
    /// tagging facility.
    ///
    /// Children inherit their parent's bridge. A root created with a bridge
    /// copies the facility's ambient tags into its own data, and derives a
    /// policy marking those keys as down-propagated tags wherever no
    /// configured setting says otherwise.
    #[must_use]
    pub fn enter_with_bridge(
        parent: Option<&Arc<Self>>,
        policy: &Arc<PropagationPolicy>,
        bridge: Option<Arc<dyn TagBridge>>,
    ) -> Arc<Self> {
        let opening_thread = thread::current().id();
        match parent {
            Some(parent) => parent.create_child(opening_thread),
            None => Self::create_root(opening_thread, policy, bridge),
        }
    }

    fn create_child(self: &Arc<Self>, opening_thread: ThreadId) -> Arc<Self> {
        let (synchronous, inherited) = {
            let mut st = self.state.lock();
            let synchronous = self.opening_thread == opening_thread && st.phase.is_open();
            let inherited = if synchronous {
                self.child_snapshot(&mut st)
            } else {
                Arc::clone(&st.post_entry)
            };
            (synchronous, inherited)
        };
        Arc::new(Self {
            id: NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed),
            policy: Arc::clone(&self.policy),
            opening_thread,
            synchronous,
            bridge: self.bridge.clone(),
            state: Mutex::new(NodeState::new(Some(Arc::downgrade(self)), inherited)),
        })
    }

    fn create_root(
        opening_thread: ThreadId,
        policy: &Arc<PropagationPolicy>,
        bridge: Option<Arc<dyn TagBridge>>,
    ) -> Arc<Self> {
        let mut policy = Arc::clone(policy);
        let mut state = NodeState::new(None, Arc::new(DataMap::new()));

        if let Some(bridge) = &bridge {
            let ambient_tags = bridge.current_tags();
            if !ambient_tags.is_empty() {
                let mut builder = policy.copy();
                let mut adjusted = false;
                for (key, value) in ambient_tags {
                    adjusted |= builder.infer_down_propagated_tag(&key);
                    state.overwrites.insert(key, Some(DataValue::Str(value)));
                }
                if adjusted {
                    policy = Arc::new(builder.build());
                }
            }
        }

        Arc::new(Self {
            id: NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed),
            policy,
            opening_thread,
            synchronous: false,
            bridge,
            state: Mutex::new(state),
        })
    }

    /// Returns the node's unique id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the policy in effect for this node.
    #[must_use]
    pub fn policy(&self) -> &Arc<PropagationPolicy> {
        &self.policy
    }

    /// Returns the current phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    /// Returns true if the node was created as a synchronous child.
    #[must_use]
    pub fn is_synchronous(&self) -> bool {
        self.synchronous
    }

    /// Returns the parent, while this node is open and the parent is alive.
    #[must_use]
    pub fn parent(&self) -> Option<Arc<Self>> {
        self.state.lock().parent.as_ref().and_then(Weak::upgrade)
    }

    /// Reads a value: local writes first (a tombstone reads as absent),
    /// then inherited data.
    pub fn get(&self, key: &str) -> Result<Option<DataValue>, ContextError> {
        let st = self.state.lock();
        self.ensure_in(&st, PhaseSet::NOT_CLOSED)?;
        Ok(match st.overwrites.get(key) {
            Some(value) => value.clone(),
            None => st.inherited.get(key).cloned(),
        })
    }

    /// Writes a value; `None` records a tombstone that hides inherited data.
    pub fn set(&self, key: impl Into<String>, value: Option<DataValue>) -> Result<(), ContextError> {
        let key = key.into();
        let mut st = self.state.lock();
        self.ensure_in(&st, PhaseSet::NOT_CLOSED)?;
        if st.phase.is_open() && self.policy.down_mode(&key).is_propagated() {
            st.cached_child = None;
        }
        st.overwrites.insert(key, value);
        Ok(())
    }

    /// Writes a value.
    pub fn set_value(
        &self,
        key: impl Into<String>,
        value: impl Into<DataValue>,
    ) -> Result<(), ContextError> {
        self.set(key, Some(value.into()))
    }

    /// Clears a value, hiding any inherited one.
    pub fn remove(&self, key: impl Into<String>) -> Result<(), ContextError> {
        self.set(key, None)
    }

    /// Writes well-known values into a freshly entered node.
    pub(crate) fn seed(&self, entries: &[(String, DataValue)]) {
        let mut st = self.state.lock();
        if st.phase == Phase::Entry {
            for (key, value) in entries {
                st.overwrites.insert(key.clone(), Some(value.clone()));
            }
        }
    }

    /// Ends the entry phase and makes this node ambient on the current thread.
    ///
    /// The snapshot handed to later children is only rebuilt when the entry
    /// phase overwrote down-propagated data. A new tag scope is opened only
    /// when down-propagated tag data changed.
    pub fn make_active(self: &Arc<Self>) -> Result<(), ContextError> {
        let tags = {
            let mut st = self.state.lock();
            self.ensure_in(&st, PhaseSet::ENTRY)?;
            if self.has_down_overwrites(&st) {
                st.post_entry = self.overlay_down_propagated(&st);
            }
            st.cached_child = Some(Arc::clone(&st.post_entry));
            st.phase = Phase::Active;
            self.changed_tags(&st)
        };

        let token = registry::attach(Arc::clone(self));
        let scope = match (&self.bridge, tags) {
            (Some(bridge), Some(tags)) => Some(bridge.open_scope(tags)),
            _ => None,
        };

        let mut st = self.state.lock();
        st.ambient = Some(token);
        st.tag_scope = scope;
        Ok(())
    }

    /// Marks the start of the exit phase.
    ///
    /// Exit-phase nodes still count as open parents for child
    /// classification and up-propagation.
    pub fn begin_exit(&self) -> Result<(), ContextError> {
        let mut st = self.state.lock();
        self.ensure_in(&st, PhaseSet::ACTIVE)?;
        st.phase = Phase::Exit;
        Ok(())
    }

    /// Closes the node.
    ///
    /// Restores the previously ambient node, closes any tag scope this node
    /// opened and, for a synchronous child whose parent is still open on
    /// this thread, writes up-propagated data into the parent. The parent
    /// reference is released either way.
    pub fn close(&self) -> Result<(), ContextError> {
        let (token, scope, parent, up_propagated) = {
            let mut st = self.state.lock();
            self.ensure_in(&st, PhaseSet::OPEN)?;
            st.phase = Phase::Closed;
            st.cached_child = None;
            let up_propagated: Vec<(String, Option<DataValue>)> = st
                .overwrites
                .drain()
                .filter(|(key, _)| self.policy.up_mode(key).is_propagated())
                .collect();
            (
                st.ambient.take(),
                st.tag_scope.take(),
                st.parent.take(),
                up_propagated,
            )
        };

        if let Some(scope) = scope {
            scope.close();
        }

        let detached = token.map_or(Ok(()), registry::detach);
        if let Err(err) = &detached {
            warn!(node = self.id, error = %err, "Context closed out of order");
        }

        if let Some(parent) = parent.and_then(|weak| weak.upgrade()) {
            if self.synchronous && parent.opening_thread == thread::current().id() {
                parent.absorb_up_propagation(&self.policy, up_propagated);
            } else if !up_propagated.is_empty() {
                debug!(
                    node = self.id,
                    parent = parent.id,
                    "Skipping up-propagation from asynchronous context"
                );
            }
        }

        detached
    }

    /// Returns the remote parent span context read from request headers.
    pub fn remote_parent_span_context(&self) -> Result<Option<SpanContext>, ContextError> {
        Ok(self
            .get(REMOTE_PARENT_SPAN_CONTEXT_KEY)?
            .and_then(|value| value.downcast_ref::<SpanContext>().copied()))
    }

    /// Returns the effective down-propagated, wire-eligible data.
    pub fn down_propagated_entries(&self) -> Result<Vec<(String, DataValue)>, ContextError> {
        self.wire_entries(|policy, key| policy.down_mode(key).is_propagated())
    }

    /// Returns the effective data that travels back to callers.
    pub fn up_propagated_entries(&self) -> Result<Vec<(String, DataValue)>, ContextError> {
        self.wire_entries(|policy, key| policy.up_mode(key).is_global())
    }

    /// Encodes down-propagated data and a span context for an outgoing request.
    ///
    /// Without an explicit span, the remote parent span (if any) is used.
    pub fn down_propagation_headers(
        &self,
        codec: &HeaderCodec,
        span: Option<&SpanContext>,
    ) -> Result<HeaderMap, ContextError> {
        let entries = self.down_propagated_entries()?;
        let remote = match span {
            Some(_) => None,
            None => self.remote_parent_span_context()?,
        };
        Ok(codec.encode(
            entries.iter().map(|(k, v)| (k.as_str(), v)),
            span.or(remote.as_ref()),
        ))
    }

    /// Encodes globally up-propagated data for a response.
    pub fn up_propagation_headers(&self, codec: &HeaderCodec) -> Result<HeaderMap, ContextError> {
        let entries = self.up_propagated_entries()?;
        Ok(codec.encode(entries.iter().map(|(k, v)| (k.as_str(), v)), None))
    }

    /// Stores data from an incoming request, and its remote parent span
    /// context under [`REMOTE_PARENT_SPAN_CONTEXT_KEY`].
    pub fn read_down_propagation_headers(
        &self,
        codec: &HeaderCodec,
        headers: &HeaderMap,
    ) -> Result<(), ContextError> {
        let decoded = codec.decode(headers);
        for (key, value) in decoded.entries {
            self.set(key, Some(value))?;
        }
        if let Some(span) = decoded.span_context {
            self.set(REMOTE_PARENT_SPAN_CONTEXT_KEY, Some(DataValue::opaque(span)))?;
        }
        Ok(())
    }

    /// Stores data from a response received from a downstream call.
    pub fn read_up_propagation_headers(
        &self,
        codec: &HeaderCodec,
        headers: &HeaderMap,
    ) -> Result<(), ContextError> {
        for (key, value) in codec.decode(headers).entries {
            self.set(key, Some(value))?;
        }
        Ok(())
    }

    fn ensure_in(&self, st: &NodeState, allowed: PhaseSet) -> Result<(), ContextError> {
        if allowed.contains(st.phase) {
            Ok(())
        } else {
            Err(ContextError::invalid_phase(self.id, allowed, st.phase))
        }
    }

    fn has_down_overwrites(&self, st: &NodeState) -> bool {
        st.overwrites
            .keys()
            .any(|key| self.policy.down_mode(key).is_propagated())
    }

    fn overlay_down_propagated(&self, st: &NodeState) -> Arc<DataMap> {
        let mut data = (*st.inherited).clone();
        for (key, value) in &st.overwrites {
            if !self.policy.down_mode(key).is_propagated() {
                continue;
            }
            match value {
                Some(value) => {
                    data.insert(key.clone(), value.clone());
                }
                None => {
                    data.remove(key);
                }
            }
        }
        Arc::new(data)
    }

    fn child_snapshot(&self, st: &mut NodeState) -> Arc<DataMap> {
        if let Some(cached) = &st.cached_child {
            return Arc::clone(cached);
        }
        let snapshot = if self.has_down_overwrites(st) {
            self.overlay_down_propagated(st)
        } else {
            Arc::clone(&st.inherited)
        };
        st.cached_child = Some(Arc::clone(&snapshot));
        snapshot
    }

    fn changed_tags(&self, st: &NodeState) -> Option<TagSet> {
        self.bridge.as_ref()?;
        let changed = st.overwrites.iter().any(|(key, value)| {
            self.policy.is_tag(key)
                && self.policy.down_mode(key).is_propagated()
                && value.as_ref() != st.inherited.get(key)
        });
        if !changed {
            return None;
        }
        let mut tags: TagSet = st
            .post_entry
            .iter()
            .filter(|(key, _)| self.policy.is_tag(key))
            .filter_map(|(key, value)| Some((key.clone(), value.to_wire_string()?)))
            .collect();
        tags.sort();
        Some(tags)
    }

    fn absorb_up_propagation(
        &self,
        child_policy: &PropagationPolicy,
        entries: Vec<(String, Option<DataValue>)>,
    ) {
        let mut st = self.state.lock();
        if !st.phase.is_open() {
            debug!(node = self.id, phase = %st.phase, "Parent no longer open, dropping up-propagation");
            return;
        }
        let mut invalidate = false;
        for (key, value) in entries {
            if child_policy.down_mode(&key).is_propagated() {
                let current = match st.overwrites.get(&key) {
                    Some(existing) => existing.as_ref(),
                    None => st.inherited.get(&key),
                };
                invalidate |= current != value.as_ref();
            }
            st.overwrites.insert(key, value);
        }
        if invalidate {
            st.cached_child = None;
        }
    }

    fn wire_entries<F>(&self, include: F) -> Result<Vec<(String, DataValue)>, ContextError>
    where
        F: Fn(&PropagationPolicy, &str) -> bool,
    {
        let st = self.state.lock();
        self.ensure_in(&st, PhaseSet::NOT_CLOSED)?;
        let inherited = st
            .inherited
            .iter()
            .filter(|(key, _)| !st.overwrites.contains_key(*key))
            .map(|(key, value)| (key, Some(value)));
        let local = st.overwrites.iter().map(|(key, value)| (key, value.as_ref()));
        Ok(inherited
            .chain(local)
            .filter(|(key, _)| include(&self.policy, key))
            .filter_map(|(key, value)| {
                let value = value?;
                value
                    .is_wire_eligible()
                    .then(|| (key.clone(), value.clone()))
            })
            .collect())
    }
}

impl NodeState {
    fn new(parent: Option<Weak<ContextNode>>, inherited: Arc<DataMap>) -> Self {
        Self {
            phase: Phase::Entry,
            parent,
            post_entry: Arc::clone(&inherited),
            inherited,
            overwrites: HashMap::new(),
            cached_child: None,
            ambient: None,
            tag_scope: None,
        }
    }
}

impl fmt::Debug for ContextNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.state.lock();
        f.debug_struct("ContextNode")
            .field("id", &self.id)
            .field("phase", &st.phase)
            .field("synchronous", &self.synchronous)
            .field("policy_version", &self.policy.version())
            .field("overwrites", &st.overwrites)
            .finish_non_exhaustive()
    }
}
