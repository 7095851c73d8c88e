//! The engine facade used by the instrumentation layer.
//!
//! [`ContextEngine`] owns the active policy, the header codec, the optional
//! tag bridge and the continuation table, and creates nodes beneath
//! whatever is ambient on the calling thread.

mod config;

pub use config::EngineConfig;

use crate::codec::{set_trace_format, trace_format, HeaderCodec, HeaderMap, SpanContext};
use crate::context::{registry, AttachToken, ContextNode, ContinuationTable, DataValue};
use crate::errors::ContextError;
use crate::policy::{PropagationPolicy, HOST_ADDRESS_KEY, HOST_KEY, SERVICE_KEY};
use crate::tags::TagBridge;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

/// Entry point for creating and propagating contexts.
pub struct ContextEngine {
    policy: RwLock<Arc<PropagationPolicy>>,
    identity: RwLock<Arc<Vec<(String, DataValue)>>>,
    bridge: Option<Arc<dyn TagBridge>>,
    codec: HeaderCodec,
    continuations: ContinuationTable,
}

impl ContextEngine {
    /// Creates an engine from configuration.
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        let engine = Self {
            policy: RwLock::new(Arc::new(PropagationPolicy::default())),
            identity: RwLock::new(Arc::new(Vec::new())),
            bridge: None,
            codec: HeaderCodec::new(),
            continuations: ContinuationTable::new(),
        };
        engine.apply_config(config);
        engine
    }

    /// Bridges tags to an external tagging facility.
    #[must_use]
    pub fn with_tag_bridge(mut self, bridge: Arc<dyn TagBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    /// Replaces the header codec.
    #[must_use]
    pub fn with_codec(mut self, codec: HeaderCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Applies a new configuration.
    ///
    /// Only roots entered afterwards use the new policy; live contexts and
    /// their future children keep the policy they were created with. The
    /// process-wide trace format is only written when it changes.
    pub fn apply_config(&self, config: &EngineConfig) {
        let policy = Arc::new(config.propagation.resolve());
        let identity: Vec<(String, DataValue)> = [
            (SERVICE_KEY, &config.service),
            (HOST_KEY, &config.host),
            (HOST_ADDRESS_KEY, &config.host_address),
        ]
        .into_iter()
        .filter_map(|(key, value)| Some((key.to_string(), DataValue::from(value.clone()?))))
        .collect();

        info!(
            policy_version = policy.version(),
            keys = policy.len(),
            trace_format = %config.trace_format,
            "Applying propagation configuration"
        );
        *self.policy.write() = policy;
        *self.identity.write() = Arc::new(identity);
        if trace_format() != config.trace_format {
            set_trace_format(config.trace_format);
        }
    }

    /// Returns the policy new roots are created with.
    #[must_use]
    pub fn policy(&self) -> Arc<PropagationPolicy> {
        Arc::clone(&*self.policy.read())
    }

    /// Returns the header codec.
    #[must_use]
    pub fn codec(&self) -> &HeaderCodec {
        &self.codec
    }

    /// Returns the continuation table.
    #[must_use]
    pub fn continuations(&self) -> &ContinuationTable {
        &self.continuations
    }

    /// Returns the context ambient on this thread, if any.
    #[must_use]
    pub fn current(&self) -> Option<Arc<ContextNode>> {
        registry::current()
    }

    /// Enters a new context beneath the one ambient on this thread.
    #[must_use]
    pub fn enter(&self) -> Arc<ContextNode> {
        self.enter_under(registry::current().as_ref())
    }

    /// Enters a new context beneath an explicit parent, or a root.
    ///
    /// Roots are seeded with the configured process identity values.
    #[must_use]
    pub fn enter_under(&self, parent: Option<&Arc<ContextNode>>) -> Arc<ContextNode> {
        let policy = self.policy();
        let node = ContextNode::enter_with_bridge(parent, &policy, self.bridge.clone());
        if parent.is_none() {
            let identity = Arc::clone(&*self.identity.read());
            node.seed(&identity);
        }
        node
    }

    /// Parks `node` against `host` for a later [`ContextEngine::resume`].
    pub fn store<H>(&self, host: &Arc<H>, node: Arc<ContextNode>, invalidate_on_restore: bool)
    where
        H: Any + Send + Sync,
    {
        self.continuations.store(host, node, invalidate_on_restore);
    }

    /// Makes the node parked against `host` ambient on this thread.
    pub fn resume<H>(&self, host: &Arc<H>) -> Option<(Arc<ContextNode>, AttachToken)>
    where
        H: Any + Send + Sync,
    {
        self.continuations.resume(host)
    }

    /// Encodes down-propagated data of `node` for an outgoing request.
    pub fn down_propagation_headers(
        &self,
        node: &ContextNode,
        span: Option<&SpanContext>,
    ) -> Result<HeaderMap, ContextError> {
        node.down_propagation_headers(&self.codec, span)
    }

    /// Encodes globally up-propagated data of `node` for a response.
    pub fn up_propagation_headers(&self, node: &ContextNode) -> Result<HeaderMap, ContextError> {
        node.up_propagation_headers(&self.codec)
    }

    /// Reads an incoming request's headers into `node`.
    pub fn read_down_propagation_headers(
        &self,
        node: &ContextNode,
        headers: &HeaderMap,
    ) -> Result<(), ContextError> {
        node.read_down_propagation_headers(&self.codec, headers)
    }

    /// Reads a downstream response's headers into `node`.
    pub fn read_up_propagation_headers(
        &self,
        node: &ContextNode,
        headers: &HeaderMap,
    ) -> Result<(), ContextError> {
        node.read_up_propagation_headers(&self.codec, headers)
    }

    /// Returns every header name the engine may write.
    #[must_use]
    pub fn declared_header_names(&self) -> BTreeSet<String> {
        self.codec.declared_header_names()
    }
}

impl Default for ContextEngine {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

impl std::fmt::Debug for ContextEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextEngine")
            .field("policy_version", &self.policy.read().version())
            .field("tag_bridge", &self.bridge.is_some())
            .field("continuations", &self.continuations.len())
            .finish_non_exhaustive()
    }
}
