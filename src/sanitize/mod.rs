//! Recursive HTML-escaping of untrusted input

use serde_json::Value;

/// Escape HTML-significant characters in a string.
pub fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

/// Deep copy of `input` with every string value HTML-escaped.
///
/// Arrays and objects are walked recursively; object keys and non-string
/// scalars pass through untouched. Never fails.
pub fn sanitize_value(input: &Value) -> Value {
    match input {
        Value::String(s) => Value::String(escape_html(s)),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_value).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), sanitize_value(value)))
                .collect(),
        ),
        other => other.clone(),
    }
}
