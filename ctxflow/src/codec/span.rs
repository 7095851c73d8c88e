//! Span context carried across process boundaries.

use std::fmt;

/// Identifiers of the span a remote caller was in, plus its sampling decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanContext {
    trace_id: u128,
    span_id: u64,
    sampled: bool,
}

impl SpanContext {
    /// Creates a span context from raw identifiers.
    #[must_use]
    pub fn new(trace_id: u128, span_id: u64, sampled: bool) -> Self {
        Self {
            trace_id,
            span_id,
            sampled,
        }
    }

    /// Creates a span context with fresh random identifiers.
    #[must_use]
    pub fn generate(sampled: bool) -> Self {
        let trace_id = uuid::Uuid::new_v4().as_u128();
        let span_id = loop {
            let id = rand::random::<u64>();
            if id != 0 {
                break id;
            }
        };
        Self::new(trace_id, span_id, sampled)
    }

    /// Returns the 128-bit trace id.
    #[must_use]
    pub fn trace_id(&self) -> u128 {
        self.trace_id
    }

    /// Returns the 64-bit span id.
    #[must_use]
    pub fn span_id(&self) -> u64 {
        self.span_id
    }

    /// Returns the sampling decision.
    #[must_use]
    pub fn is_sampled(&self) -> bool {
        self.sampled
    }

    /// Returns true if both ids are non-zero.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.trace_id != 0 && self.span_id != 0
    }

    /// Returns the trace id as 32 lowercase hex characters.
    #[must_use]
    pub fn trace_id_hex(&self) -> String {
        hex::encode(self.trace_id.to_be_bytes())
    }

    /// Returns the span id as 16 lowercase hex characters.
    #[must_use]
    pub fn span_id_hex(&self) -> String {
        hex::encode(self.span_id.to_be_bytes())
    }
}

impl fmt::Display for SpanContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} sampled={}",
            self.trace_id_hex(),
            self.span_id_hex(),
            self.sampled
        )
    }
}

/// Parses 16 or 32 hex characters into a trace id.
///
/// Shorter 64-bit ids are zero-extended on the left.
pub(crate) fn parse_trace_id(text: &str) -> Option<u128> {
    match text.len() {
        32 => {
            let mut buf = [0u8; 16];
            hex::decode_to_slice(text, &mut buf).ok()?;
            Some(u128::from_be_bytes(buf))
        }
        16 => parse_span_id(text).map(u128::from),
        _ => None,
    }
}

/// Parses exactly 16 hex characters into a span id.
pub(crate) fn parse_span_id(text: &str) -> Option<u64> {
    if text.len() != 16 {
        return None;
    }
    let mut buf = [0u8; 8];
    hex::decode_to_slice(text, &mut buf).ok()?;
    Some(u64::from_be_bytes(buf))
}
