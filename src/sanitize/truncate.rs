//! Base64 payload truncation
//!
//! Inline images and other base64 blobs dominate request bodies for vision
//! models. Anything longer than [`MAX_PAYLOAD_LEN`] keeps its first and last
//! [`KEEP_LEN`] characters around a marker recording how much was dropped.

use regex::Regex;
use serde_json::Value;
use std::ops::Range;
use std::sync::LazyLock;

/// Payloads at or below this length are left alone
pub const MAX_PAYLOAD_LEN: usize = 100;
/// Characters kept at each end of a truncated payload
pub const KEEP_LEN: usize = 50;

static DATA_URL: LazyLock<Option<Regex>> = LazyLock::new(|| {
    compile(r"data:([A-Za-z0-9.+-]+/[A-Za-z0-9.+-]+);base64,([A-Za-z0-9+/]+={0,2})")
});

static QUOTED_BASE64: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile(r#""([A-Za-z0-9+/]{100,}={0,2})""#));

static STANDALONE_BASE64: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile(r"^[A-Za-z0-9+/]{100,}={0,2}$"));

/// A payload already shortened by [`shorten`]
static TRUNCATED_PAYLOAD: LazyLock<Option<Regex>> = LazyLock::new(|| {
    compile(&format!(
        r"[A-Za-z0-9+/=]{{{keep}}}\.\.\.\d+ chars truncated\.\.\.[A-Za-z0-9+/=]{{{keep}}}",
        keep = KEEP_LEN
    ))
});

fn compile(pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::error!(pattern = %pattern, error = %e, "Invalid truncation pattern");
            None
        }
    }
}

/// Byte ranges of `s` holding truncated payloads, ends included
pub fn truncated_spans(s: &str) -> Vec<Range<usize>> {
    match TRUNCATED_PAYLOAD.as_ref() {
        Some(re) => re.find_iter(s).map(|m| m.range()).collect(),
        None => Vec::new(),
    }
}

/// Shorten a single base64 payload, keeping both ends
fn shorten(payload: &str) -> String {
    let len = payload.len();
    if len <= MAX_PAYLOAD_LEN || !payload.is_ascii() {
        return payload.to_string();
    }
    format!(
        "{}...{} chars truncated...{}",
        &payload[..KEEP_LEN],
        len - 2 * KEEP_LEN,
        &payload[len - KEEP_LEN..]
    )
}

/// Truncate base64 payloads inside a string
///
/// A string that is entirely base64 is shortened as a whole. Otherwise data
/// URLs keep their media type and quoted base64 literals keep their quotes.
pub fn truncate_str(s: &str) -> String {
    if let Some(re) = STANDALONE_BASE64.as_ref() {
        if re.is_match(s) {
            return shorten(s);
        }
    }

    let mut out = s.to_string();

    if let Some(re) = DATA_URL.as_ref() {
        if re.is_match(&out) {
            out = re
                .replace_all(&out, |caps: &regex::Captures| {
                    format!("data:{};base64,{}", &caps[1], shorten(&caps[2]))
                })
                .into_owned();
        }
    }

    if let Some(re) = QUOTED_BASE64.as_ref() {
        if re.is_match(&out) {
            out = re
                .replace_all(&out, |caps: &regex::Captures| {
                    format!("\"{}\"", shorten(&caps[1]))
                })
                .into_owned();
        }
    }

    out
}

/// Truncate every string inside a structured value
pub fn truncate(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(truncate_str(s)),
        Value::Array(items) => Value::Array(items.iter().map(truncate).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, inner)| (key.clone(), truncate(inner)))
                .collect(),
        ),
        Value::Null | Value::Bool(_) | Value::Number(_) => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde_json::json;

    fn payload(len: usize) -> String {
        "QUJD".repeat(len / 4 + 1)[..len].to_string()
    }

    #[test]
    fn test_patterns_compile() {
        assert!(DATA_URL.is_some());
        assert!(QUOTED_BASE64.is_some());
        assert!(STANDALONE_BASE64.is_some());
    }

    #[test]
    fn test_data_url_keeps_media_type_and_ends() {
        let body = payload(400);
        let input = format!("data:image/png;base64,{}", body);
        let out = truncate_str(&input);

        assert_eq!(
            out,
            format!(
                "data:image/png;base64,{}...300 chars truncated...{}",
                &body[..50],
                &body[350..]
            )
        );
    }

    #[test]
    fn test_real_image_bytes() {
        let bytes: Vec<u8> = (0..=255u8).cycle().take(3000).collect();
        let encoded = STANDARD.encode(&bytes);
        let input = format!("see data:image/jpeg;base64,{} above", encoded);
        let out = truncate_str(&input);

        assert!(out.starts_with("see data:image/jpeg;base64,"));
        assert!(out.ends_with(" above"));
        assert!(out.contains(&format!("...{} chars truncated...", encoded.len() - 100)));
        assert!(out.len() < input.len());
    }

    #[test]
    fn test_short_payloads_untouched() {
        let short = format!("data:image/png;base64,{}", payload(80));
        assert_eq!(truncate_str(&short), short);

        let exact = format!("data:image/png;base64,{}", payload(100));
        assert_eq!(truncate_str(&exact), exact);

        assert_eq!(truncate_str(&payload(99)), payload(99));
    }

    #[test]
    fn test_standalone_base64() {
        let body = payload(150);
        assert_eq!(
            truncate_str(&body),
            format!("{}...50 chars truncated...{}", &body[..50], &body[100..])
        );
    }

    #[test]
    fn test_standalone_with_padding() {
        let body = format!("{}==", "A".repeat(150));
        let out = truncate_str(&body);
        assert!(out.contains("...52 chars truncated..."));
        assert!(out.ends_with("AA=="));
    }

    #[test]
    fn test_quoted_base64_in_raw_text() {
        let body = payload(200);
        let input = format!(r#"{{"image":"{}","model":"m"}}"#, body);
        let out = truncate_str(&input);

        assert_eq!(
            out,
            format!(
                r#"{{"image":"{}...100 chars truncated...{}","model":"m"}}"#,
                &body[..50],
                &body[150..]
            )
        );
    }

    #[test]
    fn test_nested_values() {
        let url = format!("data:image/webp;base64,{}", payload(500));
        let input = json!({
            "model": "gpt-4o",
            "max_tokens": 100,
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": "what is this?"},
                    {"type": "image_url", "image_url": {"url": url}}
                ]
            }]
        });

        let out = truncate(&input);
        assert_eq!(out["model"], "gpt-4o");
        assert_eq!(out["max_tokens"], 100);
        assert_eq!(out["messages"][0]["content"][0]["text"], "what is this?");

        let truncated = out["messages"][0]["content"][1]["image_url"]["url"]
            .as_str()
            .unwrap();
        assert!(truncated.starts_with("data:image/webp;base64,"));
        assert!(truncated.contains("...400 chars truncated..."));
    }

    #[test]
    fn test_truncation_is_idempotent() {
        let input = json!({
            "a": format!("data:image/png;base64,{}", payload(1000)),
            "b": payload(300),
            "c": format!(r#"{{"x":"{}"}}"#, payload(250)),
        });
        let once = truncate(&input);
        let twice = truncate(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_plain_text_untouched() {
        let text = "The quick brown fox jumps over the lazy dog.";
        assert_eq!(truncate_str(text), text);
    }
}
