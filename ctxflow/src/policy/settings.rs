//! Configuration-side description of propagation behavior.
//!
//! [`PropagationSettings`] is what the configuration loader hands over;
//! [`PropagationSettings::resolve`] merges it with the built-in defaults and
//! metric tag declarations into a [`PropagationPolicy`].

use super::{DownMode, PolicyBuilder, PropagationPolicy, UpMode};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

/// Well-known process identity key for the service name.
pub const SERVICE_KEY: &str = "service";
/// Well-known process identity key for the host name.
pub const HOST_KEY: &str = "host";
/// Well-known process identity key for the host address.
pub const HOST_ADDRESS_KEY: &str = "host_address";

/// Explicitly configured behavior for one data key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSettings {
    /// Down-propagation mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub down_propagation: Option<DownMode>,
    /// Up-propagation mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub up_propagation: Option<UpMode>,
    /// Whether the key is a tag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_tag: Option<bool>,
}

impl DataSettings {
    /// Creates empty settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the down-propagation mode.
    #[must_use]
    pub fn with_down(mut self, mode: DownMode) -> Self {
        self.down_propagation = Some(mode);
        self
    }

    /// Sets the up-propagation mode.
    #[must_use]
    pub fn with_up(mut self, mode: UpMode) -> Self {
        self.up_propagation = Some(mode);
        self
    }

    /// Sets the tag flag.
    #[must_use]
    pub fn with_tag(mut self, is_tag: bool) -> Self {
        self.is_tag = Some(is_tag);
        self
    }
}

/// The propagation section of the engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PropagationSettings {
    /// Explicit per-key settings from user configuration.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, DataSettings>,
    /// Keys declared as tags by metric definitions.
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub metric_tags: BTreeSet<String>,
}

impl PropagationSettings {
    /// Creates empty settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds explicit settings for a key.
    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, settings: DataSettings) -> Self {
        self.data.insert(key.into(), settings);
        self
    }

    /// Declares a key as a metric tag.
    #[must_use]
    pub fn with_metric_tag(mut self, key: impl Into<String>) -> Self {
        self.metric_tags.insert(key.into());
        self
    }

    /// Builds the policy.
    ///
    /// Sources are applied lowest precedence first: built-in defaults,
    /// metric tag declarations, explicit settings. A later source replaces
    /// an earlier one field by field; each replaced value is logged once.
    #[must_use]
    pub fn resolve(&self) -> PropagationPolicy {
        let mut builder = builtin_defaults();

        for key in &self.metric_tags {
            if builder.settings(key).and_then(|s| s.tag) == Some(false) {
                log_conflict(key, "is_tag", "builtin", "metric definition");
            }
            builder = builder.with_tag(key.clone(), true);
        }

        for (key, explicit) in &self.data {
            let existing = builder.settings(key).unwrap_or_default();
            if let Some(down) = explicit.down_propagation {
                if existing.down.is_some_and(|d| d != down) {
                    log_conflict(key, "down_propagation", "default", "configuration");
                }
                builder = builder.with_down_mode(key.clone(), down);
            }
            if let Some(up) = explicit.up_propagation {
                if existing.up.is_some_and(|u| u != up) {
                    log_conflict(key, "up_propagation", "default", "configuration");
                }
                builder = builder.with_up_mode(key.clone(), up);
            }
            if let Some(tag) = explicit.is_tag {
                if existing.tag.is_some_and(|t| t != tag) {
                    let loser = if self.metric_tags.contains(key) {
                        "metric definition"
                    } else {
                        "default"
                    };
                    log_conflict(key, "is_tag", loser, "configuration");
                }
                builder = builder.with_tag(key.clone(), tag);
            }
        }

        builder.build()
    }
}

fn builtin_defaults() -> PolicyBuilder {
    [SERVICE_KEY, HOST_KEY, HOST_ADDRESS_KEY]
        .into_iter()
        .fold(PolicyBuilder::new(), |builder, key| {
            builder
                .with_down_mode(key, DownMode::ProcessLocal)
                .with_tag(key, true)
        })
}

fn log_conflict(key: &str, field: &str, overridden: &str, winner: &str) {
    info!(
        key = %key,
        field = %field,
        overridden = %overridden,
        winner = %winner,
        "Propagation setting overridden by higher precedence source"
    );
}
