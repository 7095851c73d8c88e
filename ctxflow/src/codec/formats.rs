//! Trace-context header families.
//!
//! Each family knows how to inject a [`SpanContext`] into headers and how to
//! extract one back out. Encoding uses the single process-wide
//! [`TraceFormat`]; decoding tries every family so peers on a different
//! format are still understood.

use super::span::{parse_span_id, parse_trace_id};
use super::{header, HeaderMap, SpanContext};
use crate::errors::ConfigError;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// W3C `traceparent` header.
pub const TRACEPARENT_HEADER: &str = "traceparent";
/// B3 trace id header.
pub const B3_TRACE_ID_HEADER: &str = "x-b3-traceid";
/// B3 span id header.
pub const B3_SPAN_ID_HEADER: &str = "x-b3-spanid";
/// B3 sampling header.
pub const B3_SAMPLED_HEADER: &str = "x-b3-sampled";
/// B3 debug flag header.
pub const B3_FLAGS_HEADER: &str = "x-b3-flags";
/// Datadog trace id header.
pub const DATADOG_TRACE_ID_HEADER: &str = "x-datadog-trace-id";
/// Datadog parent span id header.
pub const DATADOG_PARENT_ID_HEADER: &str = "x-datadog-parent-id";
/// Datadog sampling priority header.
pub const DATADOG_SAMPLING_PRIORITY_HEADER: &str = "x-datadog-sampling-priority";

#[allow(clippy::expect_used)]
static TRACEPARENT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([0-9a-f]{2})-([0-9a-f]{32})-([0-9a-f]{16})-([0-9a-f]{2})(-.*)?$")
        .expect("traceparent pattern is a valid regex")
});

/// Injects and extracts span contexts for one header family.
pub trait SpanContextPropagator: Send + Sync + fmt::Debug {
    /// Returns every header name this family may write.
    fn header_names(&self) -> &'static [&'static str];

    /// Writes the span context into the headers.
    fn inject(&self, span: &SpanContext, headers: &mut HeaderMap);

    /// Reads a span context from the headers, if this family's headers are
    /// present and well formed.
    fn extract(&self, headers: &HeaderMap) -> Option<SpanContext>;
}

/// W3C trace-context propagation.
#[derive(Debug, Clone, Copy, Default)]
pub struct W3cPropagator;

impl SpanContextPropagator for W3cPropagator {
    fn header_names(&self) -> &'static [&'static str] {
        &[TRACEPARENT_HEADER]
    }

    fn inject(&self, span: &SpanContext, headers: &mut HeaderMap) {
        let flags = if span.is_sampled() { "01" } else { "00" };
        headers.insert(
            TRACEPARENT_HEADER.to_string(),
            format!("00-{}-{}-{flags}", span.trace_id_hex(), span.span_id_hex()),
        );
    }

    fn extract(&self, headers: &HeaderMap) -> Option<SpanContext> {
        let value = header(headers, TRACEPARENT_HEADER)?.trim();
        let captures = TRACEPARENT_PATTERN.captures(value)?;
        let version = &captures[1];
        // Version 00 forbids trailing fields; ff is reserved as invalid.
        if version == "ff" || (version == "00" && captures.get(5).is_some()) {
            return None;
        }
        let trace_id = parse_trace_id(&captures[2])?;
        let span_id = parse_span_id(&captures[3])?;
        let flags = u8::from_str_radix(&captures[4], 16).ok()?;
        let span = SpanContext::new(trace_id, span_id, flags & 0x01 != 0);
        span.is_valid().then_some(span)
    }
}

/// B3 multi-header propagation.
#[derive(Debug, Clone, Copy, Default)]
pub struct B3Propagator;

impl SpanContextPropagator for B3Propagator {
    fn header_names(&self) -> &'static [&'static str] {
        &[B3_TRACE_ID_HEADER, B3_SPAN_ID_HEADER, B3_SAMPLED_HEADER]
    }

    fn inject(&self, span: &SpanContext, headers: &mut HeaderMap) {
        headers.insert(B3_TRACE_ID_HEADER.to_string(), span.trace_id_hex());
        headers.insert(B3_SPAN_ID_HEADER.to_string(), span.span_id_hex());
        let sampled = if span.is_sampled() { "1" } else { "0" };
        headers.insert(B3_SAMPLED_HEADER.to_string(), sampled.to_string());
    }

    fn extract(&self, headers: &HeaderMap) -> Option<SpanContext> {
        let trace_id = parse_trace_id(&header(headers, B3_TRACE_ID_HEADER)?.trim().to_ascii_lowercase())?;
        let span_id = parse_span_id(&header(headers, B3_SPAN_ID_HEADER)?.trim().to_ascii_lowercase())?;
        let debug = header(headers, B3_FLAGS_HEADER).is_some_and(|f| f.trim() == "1");
        let sampled = debug
            || header(headers, B3_SAMPLED_HEADER)
                .is_some_and(|s| matches!(s.trim(), "1" | "true" | "d"));
        let span = SpanContext::new(trace_id, span_id, sampled);
        span.is_valid().then_some(span)
    }
}

/// Datadog vendor propagation (64-bit decimal ids).
#[derive(Debug, Clone, Copy, Default)]
pub struct DatadogPropagator;

impl SpanContextPropagator for DatadogPropagator {
    fn header_names(&self) -> &'static [&'static str] {
        &[
            DATADOG_TRACE_ID_HEADER,
            DATADOG_PARENT_ID_HEADER,
            DATADOG_SAMPLING_PRIORITY_HEADER,
        ]
    }

    fn inject(&self, span: &SpanContext, headers: &mut HeaderMap) {
        // Only the lower 64 bits of the trace id fit this format.
        #[allow(clippy::cast_possible_truncation)]
        let trace_id = span.trace_id() as u64;
        headers.insert(DATADOG_TRACE_ID_HEADER.to_string(), trace_id.to_string());
        headers.insert(DATADOG_PARENT_ID_HEADER.to_string(), span.span_id().to_string());
        let priority = if span.is_sampled() { "1" } else { "0" };
        headers.insert(
            DATADOG_SAMPLING_PRIORITY_HEADER.to_string(),
            priority.to_string(),
        );
    }

    fn extract(&self, headers: &HeaderMap) -> Option<SpanContext> {
        let trace_id: u64 = header(headers, DATADOG_TRACE_ID_HEADER)?.trim().parse().ok()?;
        let span_id: u64 = header(headers, DATADOG_PARENT_ID_HEADER)?.trim().parse().ok()?;
        let sampled = header(headers, DATADOG_SAMPLING_PRIORITY_HEADER)
            .and_then(|p| p.trim().parse::<i32>().ok())
            .is_some_and(|p| p > 0);
        let span = SpanContext::new(u128::from(trace_id), span_id, sampled);
        span.is_valid().then_some(span)
    }
}

/// The header family used when injecting span contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceFormat {
    /// W3C trace-context.
    #[default]
    W3c,
    /// B3 multi-header.
    B3,
    /// Datadog vendor headers.
    Datadog,
}

impl TraceFormat {
    /// All formats, in decode priority order.
    pub const ALL: [Self; 3] = [Self::W3c, Self::B3, Self::Datadog];

    /// Returns the propagator implementing this format.
    #[must_use]
    pub fn propagator(self) -> &'static dyn SpanContextPropagator {
        match self {
            Self::W3c => &W3cPropagator,
            Self::B3 => &B3Propagator,
            Self::Datadog => &DatadogPropagator,
        }
    }
}

impl fmt::Display for TraceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::W3c => write!(f, "w3c"),
            Self::B3 => write!(f, "b3"),
            Self::Datadog => write!(f, "datadog"),
        }
    }
}

impl FromStr for TraceFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "w3c" | "tracecontext" => Ok(Self::W3c),
            "b3" => Ok(Self::B3),
            "datadog" => Ok(Self::Datadog),
            other => Err(ConfigError::UnknownTraceFormat(other.to_string())),
        }
    }
}

static GLOBAL_TRACE_FORMAT: RwLock<TraceFormat> = RwLock::new(TraceFormat::W3c);

/// Sets the process-wide trace format used for injection.
pub fn set_trace_format(format: TraceFormat) {
    *GLOBAL_TRACE_FORMAT.write() = format;
}

/// Returns the process-wide trace format used for injection.
pub fn trace_format() -> TraceFormat {
    *GLOBAL_TRACE_FORMAT.read()
}
