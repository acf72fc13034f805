//! Redaction helpers for anything written to logs or the audit trail.

use serde_json::Value;

/// Keys whose values are masked wherever they appear in audit metadata.
pub const SENSITIVE_KEYS: [&str; 5] = ["ssn", "password", "api_key", "token", "secret"];

pub const REDACTED: &str = "***REDACTED***";

/// Mask values under sensitive keys, recursing through objects and arrays.
///
/// Matching is a case-insensitive substring test on the key.
pub fn redact_metadata(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, v)| {
                    let lower = key.to_lowercase();
                    let redacted = if SENSITIVE_KEYS.iter().any(|s| lower.contains(s)) {
                        Value::String(REDACTED.to_string())
                    } else {
                        redact_metadata(v)
                    };
                    (key.clone(), redacted)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_metadata).collect()),
        other => other.clone(),
    }
}

/// Shorten `text` to at most `max_chars` characters, ending in `...` when cut.
pub fn truncate_for_log(text: &str, max_chars: usize) -> String {
    const SUFFIX: &str = "...";
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(SUFFIX.len());
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(SUFFIX);
    out
}
