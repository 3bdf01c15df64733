//! Header views safe for logging and persistence

use super::redact::{is_sensitive_field, redact_str, MASK};
use axum::http::HeaderMap;
use std::collections::BTreeMap;

/// Headers that always carry credentials or session state
const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "proxy-authorization",
    "cookie",
    "set-cookie",
    "x-api-key",
    "x-auth-token",
    "bearer",
];

pub fn is_sensitive_header(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    SENSITIVE_HEADERS.contains(&lower.as_str()) || is_sensitive_field(&lower)
}

fn joined_values(headers: &HeaderMap, name: &axum::http::HeaderName) -> String {
    headers
        .get_all(name)
        .iter()
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
        .collect::<Vec<_>>()
        .join(", ")
}

/// All headers with sensitive values masked and the rest redacted
///
/// Repeated headers are joined with `", "`.
pub fn log_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .keys()
        .map(|name| {
            let value = if is_sensitive_header(name.as_str()) {
                MASK.to_string()
            } else {
                redact_str(&joined_values(headers, name))
            };
            (name.as_str().to_string(), value)
        })
        .collect()
}

/// Non-sensitive headers for stored records, first value only
pub fn persisted_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .keys()
        .filter(|name| !is_sensitive_header(name.as_str()))
        .filter_map(|name| {
            headers
                .get(name)
                .map(|v| (name.as_str().to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
        })
        .collect()
}
