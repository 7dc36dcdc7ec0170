//! Helpers for reading loosely-typed server payloads.
//!
//! Battle and room payloads come from several backend revisions, so flags may
//! arrive as booleans, numbers, strings or be missing altogether. These
//! helpers read them the way the browser client always has: by truthiness.

use serde_json::Value;

/// JavaScript-style truthiness of a JSON value.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Truthiness of `payload[key]`, false when missing.
pub fn flag(payload: &Value, key: &str) -> bool {
    payload.get(key).is_some_and(truthy)
}

/// Non-empty string at `payload[key]`.
pub fn string_field<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

/// Array at `payload[key]`, empty slice when missing or not an array.
pub fn array_field<'a>(payload: &'a Value, key: &str) -> &'a [Value] {
    payload
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Whether `payload[key]` holds something worth acting on: a non-empty array,
/// a non-empty object, or any other truthy value.
pub fn has_content(payload: &Value, key: &str) -> bool {
    match payload.get(key) {
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
        Some(other) => truthy(other),
        None => false,
    }
}

/// Identifier of a list entry: the string itself, or its `id` field.
pub fn entry_id(entry: &Value) -> Option<String> {
    match entry {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(map) => match map.get("id") {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        },
        _ => None,
    }
}
