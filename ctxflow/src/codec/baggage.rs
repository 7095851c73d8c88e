//! Baggage header encoding.
//!
//! Format: `key1=value1;type=l,key2=value2`. Keys and values are
//! percent-encoded; the optional `type` attribute names the primitive type
//! of a non-string value.

use crate::context::DataValue;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

/// Header carrying baggage.
pub const BAGGAGE_HEADER: &str = "baggage";
/// Older baggage header still accepted on decode.
pub const CORRELATION_CONTEXT_HEADER: &str = "correlation-context";

const TYPE_ATTRIBUTE: &str = "type=";

/// Why a single baggage pair was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub(crate) enum DecodeIssue {
    #[error("expected exactly one '=' in key/value pair")]
    WrongArity,
    #[error("empty key")]
    EmptyKey,
    #[error("invalid percent-encoding")]
    BadEncoding,
    #[error("unknown type attribute {0:?}")]
    UnknownType(String),
    #[error("value does not parse as type {0}")]
    BadValue(char),
}

/// Encodes entries into a baggage header value.
///
/// Opaque values are skipped. Returns `None` when nothing is encodable.
/// Entries are ordered by key so the output is stable.
pub(crate) fn encode<'a, I>(entries: I) -> Option<String>
where
    I: IntoIterator<Item = (&'a str, &'a DataValue)>,
{
    let mut pairs: Vec<(&str, String)> = entries
        .into_iter()
        .filter_map(|(key, value)| Some((key, encode_pair(key, value)?)))
        .collect();
    if pairs.is_empty() {
        return None;
    }
    pairs.sort_by(|a, b| a.0.cmp(b.0));
    let encoded: Vec<String> = pairs.into_iter().map(|(_, pair)| pair).collect();
    Some(encoded.join(","))
}

fn encode_pair(key: &str, value: &DataValue) -> Option<String> {
    let text = value.to_wire_string()?;
    let mut pair = format!(
        "{}={}",
        urlencoding::encode(key),
        urlencoding::encode(&text)
    );
    if let Some(tag) = value.type_tag() {
        pair.push(';');
        pair.push_str(TYPE_ATTRIBUTE);
        pair.push(tag);
    }
    Some(pair)
}

/// Decodes a baggage header value into `out`.
///
/// Each malformed pair is logged and skipped; the rest still decode.
pub(crate) fn decode_into(header_value: &str, out: &mut HashMap<String, DataValue>) {
    for segment in header_value.split(',') {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        match decode_pair(segment) {
            Ok((key, value)) => {
                out.insert(key, value);
            }
            Err(issue) => {
                debug!(segment = %segment, issue = %issue, "Dropping malformed baggage entry");
            }
        }
    }
}

fn decode_pair(segment: &str) -> Result<(String, DataValue), DecodeIssue> {
    let mut parts = segment.split(';');
    let key_value = parts.next().unwrap_or_default();

    let fields: Vec<&str> = key_value.split('=').collect();
    let [raw_key, raw_value] = fields.as_slice() else {
        return Err(DecodeIssue::WrongArity);
    };

    let key = percent_decode(raw_key.trim())?;
    if key.is_empty() {
        return Err(DecodeIssue::EmptyKey);
    }
    let text = percent_decode(raw_value.trim())?;

    let mut type_tag = None;
    for property in parts {
        let property = property.trim();
        if let Some(raw_type) = property.strip_prefix(TYPE_ATTRIBUTE) {
            let mut chars = raw_type.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => type_tag = Some(c),
                _ => return Err(DecodeIssue::UnknownType(raw_type.to_string())),
            }
        }
    }

    let value = DataValue::parse_typed(&text, type_tag).ok_or_else(|| match type_tag {
        Some(c @ ('z' | 'b' | 's' | 'i' | 'l' | 'f' | 'd')) => DecodeIssue::BadValue(c),
        Some(c) => DecodeIssue::UnknownType(c.to_string()),
        None => DecodeIssue::BadEncoding,
    })?;
    Ok((key, value))
}

fn percent_decode(text: &str) -> Result<String, DecodeIssue> {
    urlencoding::decode(text)
        .map(std::borrow::Cow::into_owned)
        .map_err(|_| DecodeIssue::BadEncoding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn decode(value: &str) -> HashMap<String, DataValue> {
        let mut out = HashMap::new();
        decode_into(value, &mut out);
        out
    }

    #[test]
    fn test_encode_typed_value() {
        let value = DataValue::I64(42);
        assert_eq!(encode([("count", &value)]), Some("count=42;type=l".to_string()));
    }

    #[test]
    fn test_encode_percent_encodes() {
        let value = DataValue::from("a b,c;d=e");
        assert_eq!(
            encode([("my key", &value)]),
            Some("my%20key=a%20b%2Cc%3Bd%3De".to_string())
        );
    }

    #[test]
    fn test_encode_skips_opaque_and_sorts() {
        let opaque = DataValue::opaque(5u8);
        let b = DataValue::Bool(true);
        let a = DataValue::from("x");
        assert_eq!(
            encode([("o", &opaque), ("b", &b), ("a", &a)]),
            Some("a=x,b=true;type=z".to_string())
        );
        assert_eq!(encode([("o", &opaque)]), None);
    }

    #[test]
    fn test_decode_skips_malformed_pairs() {
        let decoded = decode("a=b=c, x=y");
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded.get("x"), Some(&DataValue::from("y")));
    }

    #[test]
    fn test_decode_bad_entries_individually() {
        let decoded = decode("n=abc;type=l,u=1;type=q,w=1;type=zz,=v,noequals,ok=1;type=i");
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded.get("ok"), Some(&DataValue::I32(1)));
    }

    #[test]
    fn test_decode_bad_utf8() {
        let decoded = decode("k=%FF%FE,x=1;type=b");
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded.get("x"), Some(&DataValue::I8(1)));
    }

    #[test]
    fn test_decode_ignores_unknown_properties() {
        let decoded = decode("k=v;propagation=x;type=d");
        assert_eq!(decoded.get("k"), None);

        let decoded = decode("k=2.5;ttl=3;type=d");
        assert_eq!(decoded.get("k"), Some(&DataValue::F64(2.5)));
    }

    #[test]
    fn test_decode_pair_issues() {
        assert_eq!(decode_pair("a=b=c"), Err(DecodeIssue::WrongArity));
        assert_eq!(decode_pair("=v"), Err(DecodeIssue::EmptyKey));
        assert_eq!(decode_pair("k=x;type=l"), Err(DecodeIssue::BadValue('l')));
        assert_eq!(
            decode_pair("k=x;type=q"),
            Err(DecodeIssue::UnknownType("q".to_string()))
        );
    }
}
