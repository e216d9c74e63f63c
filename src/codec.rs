//! Text encoding of record values.
//!
//! Remote stores keep values as text. Strings go in verbatim and everything
//! else is JSON-encoded; reading parses JSON and falls back to the raw text.
//! A string that would itself parse as JSON (`"42"`, `"true"`, `"{}"`) is
//! quoted on the way in so it comes back as a string.

use serde_json::Value;

pub fn encode_value(value: &Value) -> String {
  match value {
    Value::String(s) if serde_json::from_str::<Value>(s).is_err() => s.clone(),
    other => other.to_string(),
  }
}

pub fn decode_value(text: &str) -> Value {
  serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

/// Shape a value for an API that keeps strings as sent and JSON-encodes
/// everything else, so the stored text matches [`encode_value`].
pub fn wire_value(value: &Value) -> Value {
  match value {
    Value::String(_) => Value::String(encode_value(value)),
    other => other.clone(),
  }
}

/// Normalize a value that a remote returned already parsed.
///
/// PostgREST hands back `text` columns as JSON strings, so a stored object
/// arrives as `"{\"a\":1}"` and needs the same fallback parse.
pub fn decode_json(value: Value) -> Value {
  match value {
    Value::String(s) => decode_value(&s),
    other => other,
  }
}
