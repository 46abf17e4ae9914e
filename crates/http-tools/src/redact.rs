//! Redaction and truncation helpers.
//!
//! Everything that leaves the process (log lines, error messages, upstream
//! body excerpts) passes through here first. Redaction is mandatory, not
//! best-effort: callers scrub known secret values *and* mask sensitive keys.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

pub const REDACTED: &str = "***REDACTED***";

static SENSITIVE_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(token|secret|api[_-]?key|password|credential|authorization)")
        .expect("sensitive key pattern compiles")
});

/// Mask the values of sensitive keys in a JSON payload, recursively.
#[must_use]
pub fn redact_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, val) in map {
                if SENSITIVE_KEY.is_match(key) {
                    out.insert(key.clone(), Value::String(REDACTED.to_string()));
                } else {
                    out.insert(key.clone(), redact_json(val));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_json).collect()),
        other => other.clone(),
    }
}

/// Replace every occurrence of each known secret value in `text`.
///
/// Empty and very short secrets are skipped so placeholder values cannot
/// shred unrelated text.
#[must_use]
pub fn scrub_secrets(text: &str, secrets: &[&str]) -> String {
    let mut out = text.to_string();
    for secret in secrets {
        if secret.len() < 4 {
            continue;
        }
        out = out.replace(secret, REDACTED);
    }
    out
}

/// Truncate to at most `max` bytes on a char boundary, marking the cut.
#[must_use]
pub fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated)", &text[..end])
}
