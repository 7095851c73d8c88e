//! Wire header codec.
//!
//! This module provides:
//! - Baggage encoding of allow-listed context values
//! - Span context injection in the configured trace format
//! - Tolerant decoding of every supported trace format

mod baggage;
mod formats;
mod span;

pub use baggage::{BAGGAGE_HEADER, CORRELATION_CONTEXT_HEADER};
pub use formats::{
    set_trace_format, trace_format, B3Propagator, DatadogPropagator, SpanContextPropagator,
    TraceFormat, W3cPropagator, B3_FLAGS_HEADER, B3_SAMPLED_HEADER, B3_SPAN_ID_HEADER,
    B3_TRACE_ID_HEADER, DATADOG_PARENT_ID_HEADER, DATADOG_SAMPLING_PRIORITY_HEADER,
    DATADOG_TRACE_ID_HEADER, TRACEPARENT_HEADER,
};
pub use span::SpanContext;

use crate::context::DataValue;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Header name to header value.
pub type HeaderMap = HashMap<String, String>;

/// Looks up a header by name, ignoring ASCII case.
pub(crate) fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).map(String::as_str).or_else(|| {
        headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    })
}

/// Result of decoding a set of headers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Decoded {
    /// Baggage entries.
    pub entries: HashMap<String, DataValue>,
    /// The remote parent span context, if any trace format matched.
    pub span_context: Option<SpanContext>,
}

/// Encodes context data and span contexts to headers and back.
#[derive(Debug, Clone)]
pub struct HeaderCodec {
    extractors: Vec<Arc<dyn SpanContextPropagator>>,
}

impl Default for HeaderCodec {
    fn default() -> Self {
        Self {
            extractors: vec![
                Arc::new(W3cPropagator),
                Arc::new(B3Propagator),
                Arc::new(DatadogPropagator),
            ],
        }
    }
}

impl HeaderCodec {
    /// Creates a codec that understands every built-in trace format.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a span context extractor, tried after the existing ones.
    #[must_use]
    pub fn with_extractor(mut self, extractor: Arc<dyn SpanContextPropagator>) -> Self {
        self.extractors.push(extractor);
        self
    }

    /// Encodes entries, and the span context in the process-wide format.
    pub fn encode<'a, I>(&self, entries: I, span: Option<&SpanContext>) -> HeaderMap
    where
        I: IntoIterator<Item = (&'a str, &'a DataValue)>,
    {
        self.encode_with_format(trace_format(), entries, span)
    }

    /// Encodes entries, and the span context in the given format.
    pub fn encode_with_format<'a, I>(
        &self,
        format: TraceFormat,
        entries: I,
        span: Option<&SpanContext>,
    ) -> HeaderMap
    where
        I: IntoIterator<Item = (&'a str, &'a DataValue)>,
    {
        let mut headers = HeaderMap::new();
        if let Some(value) = baggage::encode(entries) {
            headers.insert(BAGGAGE_HEADER.to_string(), value);
        }
        if let Some(span) = span.filter(|s| s.is_valid()) {
            format.propagator().inject(span, &mut headers);
        }
        headers
    }

    /// Decodes baggage and the remote span context.
    ///
    /// Never fails: malformed baggage pairs are dropped one by one, and a
    /// span context is taken from the first extractor that recognises the
    /// headers.
    #[must_use]
    pub fn decode(&self, headers: &HeaderMap) -> Decoded {
        let mut entries = HashMap::new();
        // The current header is applied last so it wins over the legacy one.
        for name in [CORRELATION_CONTEXT_HEADER, BAGGAGE_HEADER] {
            if let Some(value) = header(headers, name) {
                baggage::decode_into(value, &mut entries);
            }
        }
        let span_context = self
            .extractors
            .iter()
            .find_map(|extractor| extractor.extract(headers));
        Decoded {
            entries,
            span_context,
        }
    }

    /// Returns every header name `encode` may produce under any format.
    #[must_use]
    pub fn declared_header_names(&self) -> BTreeSet<String> {
        let mut names: BTreeSet<String> = TraceFormat::ALL
            .iter()
            .flat_map(|f| f.propagator().header_names().iter())
            .chain(
                self.extractors
                    .iter()
                    .flat_map(|e| e.header_names().iter()),
            )
            .map(|name| (*name).to_string())
            .collect();
        names.insert(BAGGAGE_HEADER.to_string());
        names
    }
}
