//! Engine configuration.

use crate::codec::TraceFormat;
use crate::errors::ConfigError;
use crate::policy::PropagationSettings;
use serde::{Deserialize, Serialize};

/// Everything the configuration loader hands to the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Per-key propagation settings.
    pub propagation: PropagationSettings,
    /// Header family used when injecting span contexts.
    pub trace_format: TraceFormat,
    /// Service name seeded into every root context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    /// Host name seeded into every root context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Host address seeded into every root context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_address: Option<String>,
}

impl EngineConfig {
    /// Creates a default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Sets the propagation settings.
    #[must_use]
    pub fn with_propagation(mut self, propagation: PropagationSettings) -> Self {
        self.propagation = propagation;
        self
    }

    /// Sets the trace format.
    #[must_use]
    pub fn with_trace_format(mut self, format: TraceFormat) -> Self {
        self.trace_format = format;
        self
    }

    /// Sets the service name.
    #[must_use]
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    /// Sets the host name.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the host address.
    #[must_use]
    pub fn with_host_address(mut self, address: impl Into<String>) -> Self {
        self.host_address = Some(address.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::UpMode;

    #[test]
    fn test_from_json() {
        let config = EngineConfig::from_json_str(
            r#"{
                "trace_format": "b3",
                "service": "checkout",
                "propagation": {
                    "data": {"user": {"up_propagation": "global"}}
                }
            }"#,
        )
        .unwrap();

        assert_eq!(config.trace_format, TraceFormat::B3);
        assert_eq!(config.service.as_deref(), Some("checkout"));
        assert_eq!(config.propagation.resolve().up_mode("user"), UpMode::Global);
    }

    #[test]
    fn test_empty_json_is_default() {
        assert_eq!(EngineConfig::from_json_str("{}").unwrap(), EngineConfig::default());
    }

    #[test]
    fn test_invalid_json() {
        let err = EngineConfig::from_json_str(r#"{"trace_format": "zipkin"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::new()
            .with_service("svc")
            .with_host("h1")
            .with_host_address("10.0.0.1")
            .with_trace_format(TraceFormat::Datadog);
        assert_eq!(config.host.as_deref(), Some("h1"));
        assert_eq!(config.host_address.as_deref(), Some("10.0.0.1"));
        assert_eq!(config.trace_format, TraceFormat::Datadog);
    }
}
