//! The immutable propagation policy and its copy-on-write builder.

use super::{DownMode, UpMode};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_VERSION: AtomicU64 = AtomicU64::new(1);

/// Settings recorded for a single data key.
///
/// A `None` field was never set by any source and reads as the built-in
/// default. Keeping "unset" distinct from "set to the default" lets lower
/// precedence sources fill gaps without overriding explicit choices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyPolicy {
    /// Down-propagation mode, if set.
    pub down: Option<DownMode>,
    /// Up-propagation mode, if set.
    pub up: Option<UpMode>,
    /// Whether the key is a tag, if set.
    pub tag: Option<bool>,
}

impl KeyPolicy {
    /// Effective down-propagation mode.
    #[must_use]
    pub fn down_mode(&self) -> DownMode {
        self.down.unwrap_or_default()
    }

    /// Effective up-propagation mode.
    #[must_use]
    pub fn up_mode(&self) -> UpMode {
        self.up.unwrap_or_default()
    }

    /// Effective tag flag.
    #[must_use]
    pub fn is_tag(&self) -> bool {
        self.tag.unwrap_or(false)
    }
}

/// Immutable, versioned map from data key to propagation behavior.
///
/// Keys without an entry are neither propagated nor tags. A policy is built
/// once per configuration change and shared by every context created while
/// it is active; contexts that need an adjusted view derive a new policy via
/// [`PropagationPolicy::copy`] instead of mutating the shared one.
#[derive(Debug, Clone)]
pub struct PropagationPolicy {
    version: u64,
    entries: Arc<HashMap<String, KeyPolicy>>,
}

impl Default for PropagationPolicy {
    fn default() -> Self {
        PolicyBuilder::new().build()
    }
}

impl PropagationPolicy {
    /// Starts building a policy from scratch.
    #[must_use]
    pub fn builder() -> PolicyBuilder {
        PolicyBuilder::new()
    }

    /// Starts building a policy based on this one.
    ///
    /// The entries are shared until the builder first modifies them.
    #[must_use]
    pub fn copy(&self) -> PolicyBuilder {
        PolicyBuilder {
            entries: Arc::clone(&self.entries),
        }
    }

    /// Returns the version stamp, unique per built policy.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns true if the key is exposed as a tag.
    #[must_use]
    pub fn is_tag(&self, key: &str) -> bool {
        self.entries.get(key).is_some_and(KeyPolicy::is_tag)
    }

    /// Returns the down-propagation mode for the key.
    #[must_use]
    pub fn down_mode(&self, key: &str) -> DownMode {
        self.entries
            .get(key)
            .map(KeyPolicy::down_mode)
            .unwrap_or_default()
    }

    /// Returns the up-propagation mode for the key.
    #[must_use]
    pub fn up_mode(&self, key: &str) -> UpMode {
        self.entries.get(key).map(KeyPolicy::up_mode).unwrap_or_default()
    }

    /// Returns the recorded settings for the key, if any source set them.
    #[must_use]
    pub fn settings(&self, key: &str) -> Option<KeyPolicy> {
        self.entries.get(key).copied()
    }

    /// Returns all keys that carry settings.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Returns the number of keys that carry settings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no key carries settings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Copy-on-write builder for [`PropagationPolicy`].
#[derive(Debug, Clone, Default)]
pub struct PolicyBuilder {
    entries: Arc<HashMap<String, KeyPolicy>>,
}

impl PolicyBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, key: impl Into<String>) -> &mut KeyPolicy {
        Arc::make_mut(&mut self.entries)
            .entry(key.into())
            .or_default()
    }

    /// Sets whether the key is a tag.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, is_tag: bool) -> Self {
        self.entry(key).tag = Some(is_tag);
        self
    }

    /// Sets the down-propagation mode for the key.
    #[must_use]
    pub fn with_down_mode(mut self, key: impl Into<String>, mode: DownMode) -> Self {
        self.entry(key).down = Some(mode);
        self
    }

    /// Sets the up-propagation mode for the key.
    #[must_use]
    pub fn with_up_mode(mut self, key: impl Into<String>, mode: UpMode) -> Self {
        self.entry(key).up = Some(mode);
        self
    }

    /// Marks the key as a down-propagated tag, but only for the fields no
    /// other source has set.
    ///
    /// Returns whether anything changed.
    pub fn infer_down_propagated_tag(&mut self, key: &str) -> bool {
        if let Some(existing) = self.entries.get(key) {
            if existing.down.is_some() && existing.tag.is_some() {
                return false;
            }
        }
        let entry = self.entry(key);
        let before = *entry;
        entry.down.get_or_insert(DownMode::ProcessLocal);
        entry.tag.get_or_insert(true);
        before != *entry
    }

    /// Returns the settings recorded so far for the key.
    #[must_use]
    pub fn settings(&self, key: &str) -> Option<KeyPolicy> {
        self.entries.get(key).copied()
    }

    /// Freezes the builder into a policy with a fresh version.
    #[must_use]
    pub fn build(self) -> PropagationPolicy {
        PropagationPolicy {
            version: NEXT_VERSION.fetch_add(1, Ordering::Relaxed),
            entries: self.entries,
        }
    }
}
