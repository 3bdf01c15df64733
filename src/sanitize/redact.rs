//! Credential redaction
//!
//! Two independent passes:
//! 1. Content patterns rewrite credential-shaped substrings inside any string
//!    (vendor API keys, bearer tokens, authorization lines, opaque secrets).
//! 2. Field names: an object entry whose key looks sensitive has its whole
//!    value replaced by [`MASK`], whatever the value contains.

use super::truncate::truncated_spans;
use regex::{Captures, Regex};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::ops::Range;
use std::sync::LazyLock;

/// Replacement for values of sensitive fields
pub const MASK: &str = "***MASKED***";

/// Case-insensitive substrings marking a field name as sensitive
const SENSITIVE_FIELD_NAMES: &[&str] = &[
    "api_key",
    "apikey",
    "api-key",
    "api key",
    "secret",
    "password",
    "token",
    "authorization",
    "credential",
    "key",
    "value",
];

/// A content pattern and its distinguishable replacement
struct RedactPattern {
    name: &'static str,
    regex: Regex,
    replacement: &'static str,
}

/// Order matters: header lines and bearer tokens are rewritten before the key
/// patterns so a key inside `Authorization: Bearer sk-...` collapses into a
/// single marker, and the opaque-secret catch-all runs last.
const PATTERN_SOURCES: &[(&str, &str, &str)] = &[
    (
        "authorization_header",
        r"(?i)authorization:\s*(?:(?:bearer|basic)\s+)?[^\s]+",
        "Authorization: ***MASKED***",
    ),
    (
        "bearer_token",
        r"Bearer\s+[A-Za-z0-9._~+/-]+=*",
        "Bearer ***MASKED***",
    ),
    (
        "anthropic_api_key",
        r"sk-ant-[A-Za-z0-9_-]{20,}",
        "sk-ant-***MASKED***",
    ),
    (
        "openai_api_key",
        r"sk-[A-Za-z0-9_-]{20,}",
        "sk-***MASKED***",
    ),
    (
        "opaque_secret",
        r"[A-Za-z0-9]{32,}",
        "***MASKED_API_KEY***",
    ),
];

static PATTERNS: LazyLock<Vec<RedactPattern>> = LazyLock::new(|| {
    PATTERN_SOURCES
        .iter()
        .filter_map(|&(name, pattern, replacement)| match Regex::new(pattern) {
            Ok(regex) => Some(RedactPattern {
                name,
                regex,
                replacement,
            }),
            Err(e) => {
                tracing::error!(pattern = %name, error = %e, "Invalid redaction pattern");
                None
            }
        })
        .collect()
});

/// Check whether a field or header name indicates sensitive content
pub fn is_sensitive_field(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    SENSITIVE_FIELD_NAMES
        .iter()
        .any(|sensitive| lower.contains(sensitive))
}

/// Apply the content patterns to a single string
///
/// Matches overlapping a truncated payload (see [`truncated_spans`]) are left
/// alone so its kept ends still identify it.
pub fn redact_str(s: &str) -> String {
    let mut current: Cow<'_, str> = Cow::Borrowed(s);
    for pattern in PATTERNS.iter() {
        if !pattern.regex.is_match(&current) {
            continue;
        }

        let protected = truncated_spans(&current);
        let replaced = pattern
            .regex
            .replace_all(&current, |caps: &Captures<'_>| match caps.get(0) {
                Some(m) if overlaps(m.range(), &protected) => m.as_str().to_string(),
                _ => pattern.replacement.to_string(),
            })
            .into_owned();

        if replaced != *current {
            tracing::trace!(pattern = pattern.name, "Redacted credential-shaped content");
            current = Cow::Owned(replaced);
        }
    }
    current.into_owned()
}

fn overlaps(range: Range<usize>, spans: &[Range<usize>]) -> bool {
    spans
        .iter()
        .any(|span| range.start < span.end && span.start < range.end)
}

/// Redact a structured value, returning a new value of the same shape
pub fn redact(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(redact_str(s)),
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, inner)| {
                    let masked = if is_sensitive_field(key) {
                        Value::String(MASK.to_string())
                    } else {
                        redact(inner)
                    };
                    (key.clone(), masked)
                })
                .collect(),
        ),
        Value::Null | Value::Bool(_) | Value::Number(_) => value.clone(),
    }
}

/// Redact a typed record by round-tripping it through [`Value`]
///
/// When the redacted value no longer fits `T` (e.g. a numeric field named
/// `max_tokens` now holds the mask string) the original is returned unchanged
/// and the failure is logged.
pub fn redact_typed<T>(value: &T) -> T
where
    T: Serialize + DeserializeOwned + Clone,
{
    let as_value = match serde_json::to_value(value) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!(error = %e, "Failed to convert value for redaction, keeping original");
            return value.clone();
        }
    };

    match serde_json::from_value(redact(&as_value)) {
        Ok(redacted) => redacted,
        Err(e) => {
            tracing::error!(error = %e, "Redacted value no longer matches its type, keeping original");
            value.clone()
        }
    }
}

/// Redact JSON text, falling back to string patterns when it does not parse
pub fn redact_json_text(text: &str) -> String {
    match serde_json::from_str::<Value>(text) {
        Ok(parsed) => redact(&parsed).to_string(),
        Err(_) => redact_str(text),
    }
}
