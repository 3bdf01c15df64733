//! 安全的日志记录工具
//!
//! Sanitizers applied to anything that is logged or persisted:
//! - [`redact`]: masks credential-shaped strings and sensitive fields
//! - [`truncate`]: shortens long base64 payloads (data URLs, inline images)
//! - [`headers`]: header-map views safe for logs and stored records
//!
//! Both value transforms work over `serde_json::Value`, return a new value and
//! keep the input's shape: objects keep their keys, arrays keep their length.

pub mod headers;
pub mod redact;
pub mod truncate;

pub use headers::{log_headers, persisted_headers};
pub use redact::{redact, redact_str, redact_typed, MASK};
pub use truncate::{truncate, truncate_str};

use serde_json::Value;

/// Truncate then redact a structured value
///
/// Truncation runs first so base64 payloads are recognised before the opaque
/// secret pattern rewrites their alphanumeric runs.
pub fn sanitize(value: &Value) -> Value {
    redact(&truncate(value))
}

/// Truncate then redact a raw string
pub fn sanitize_str(s: &str) -> String {
    redact_str(&truncate_str(s))
}
