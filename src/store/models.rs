//! Persisted record kinds
//!
//! Field names are read by external analytics tooling and must stay stable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

fn is_zero(n: &i64) -> bool {
    *n == 0
}

fn is_zero_f64(n: &f64) -> bool {
    *n == 0.0
}

/// One proxied request, written once after the response is finalized
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestLogRecord {
    pub request_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub correlation_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub session_id: String,
    pub timestamp: DateTime<Utc>,

    // Request
    pub method: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_agent: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_ip: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub original_model: String,
    /// Sanitized JSON text
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub request_body: String,

    // Routing
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub selected_vendor: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub selected_model: String,

    // Response
    pub status_code: u16,
    /// Sanitized JSON text, or a placeholder for streams
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub response_body: String,
    pub duration_ms: i64,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_type: String,

    #[serde(default)]
    pub is_streaming: bool,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub stream_chunks: i64,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub prompt_tokens: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub completion_tokens: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub total_tokens: i64,

    pub environment: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RequestLogRecord {
    /// Minimal record for `method path`, remaining fields empty
    pub fn new(request_id: impl Into<String>, method: impl Into<String>, path: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            request_id: request_id.into(),
            correlation_id: String::new(),
            session_id: String::new(),
            timestamp: now,
            method: method.into(),
            path: path.into(),
            user_agent: String::new(),
            client_ip: String::new(),
            headers: BTreeMap::new(),
            original_model: String::new(),
            request_body: String::new(),
            selected_vendor: String::new(),
            selected_model: String::new(),
            status_code: 0,
            response_body: String::new(),
            duration_ms: 0,
            error_message: String::new(),
            error_type: String::new(),
            is_streaming: false,
            stream_chunks: 0,
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
            environment: String::new(),
            version: String::new(),
            metadata: Map::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Aggregated vendor performance over one period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorMetricsRecord {
    pub vendor: String,
    pub model: String,
    pub environment: String,

    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    /// hour, day, week or month
    pub period_type: String,

    pub total_requests: i64,
    pub successful_requests: i64,
    pub failed_requests: i64,

    pub avg_duration_ms: f64,
    pub min_duration_ms: i64,
    pub max_duration_ms: i64,
    pub median_duration_ms: f64,

    /// Percentage
    pub error_rate: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub error_breakdown: BTreeMap<String, i64>,
    #[serde(default)]
    pub status_code_counts: BTreeMap<String, i64>,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub total_prompt_tokens: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub total_completion_tokens: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub total_tokens: i64,
    #[serde(default, skip_serializing_if = "is_zero_f64")]
    pub avg_tokens_per_request: f64,

    pub streaming_requests: i64,
    #[serde(default, skip_serializing_if = "is_zero_f64")]
    pub avg_stream_chunks: f64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Point-in-time service health
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemHealthRecord {
    pub timestamp: DateTime<Utc>,
    pub environment: String,

    /// healthy, degraded or unhealthy
    pub service_status: String,
    pub database_status: String,
    #[serde(default)]
    pub vendor_statuses: BTreeMap<String, String>,

    pub requests_per_minute: f64,
    pub avg_response_time: f64,
    pub error_rate: f64,

    #[serde(default, skip_serializing_if = "is_zero_f64")]
    pub memory_usage_mb: f64,
    #[serde(default, skip_serializing_if = "is_zero_f64")]
    pub cpu_usage_percent: f64,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub circuit_breaker_states: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,

    pub created_at: DateTime<Utc>,
}

impl SystemHealthRecord {
    pub fn new(environment: impl Into<String>, service_status: impl Into<String>, database_status: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            timestamp: now,
            environment: environment.into(),
            service_status: service_status.into(),
            database_status: database_status.into(),
            vendor_statuses: BTreeMap::new(),
            requests_per_minute: 0.0,
            avg_response_time: 0.0,
            error_rate: 0.0,
            memory_usage_mb: 0.0,
            cpu_usage_percent: 0.0,
            circuit_breaker_states: BTreeMap::new(),
            version: String::new(),
            metadata: Map::new(),
            created_at: now,
        }
    }
}

/// Per-session usage, merged on every upsert
///
/// `first_seen` and `created_at` are written only when the session is first
/// stored; `last_seen`, `updated_at` and `request_count` move on every upsert
/// and the usage lists grow as a set union.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSessionRecord {
    pub session_id: String,
    pub user_agent: String,
    pub client_ip: String,
    pub environment: String,

    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub request_count: i64,

    #[serde(default)]
    pub models_used: Vec<String>,
    #[serde(default)]
    pub vendors_used: Vec<String>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub total_tokens: i64,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserSessionRecord {
    pub fn new(
        session_id: impl Into<String>,
        user_agent: impl Into<String>,
        client_ip: impl Into<String>,
        environment: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            user_agent: user_agent.into(),
            client_ip: client_ip.into(),
            environment: environment.into(),
            first_seen: now,
            last_seen: now,
            request_count: 0,
            models_used: Vec::new(),
            vendors_used: Vec::new(),
            total_tokens: 0,
            metadata: Map::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_log_omits_empty_fields() {
        let mut record = RequestLogRecord::new("req-1", "POST", "/v1/chat/completions");
        record.status_code = 200;
        record.environment = "test".to_string();

        let doc = serde_json::to_value(&record).unwrap();
        let obj = doc.as_object().unwrap();
        assert_eq!(obj["request_id"], "req-1");
        assert_eq!(obj["status_code"], 200);
        assert_eq!(obj["is_streaming"], false);
        assert!(obj.contains_key("duration_ms"));
        assert!(!obj.contains_key("selected_vendor"));
        assert!(!obj.contains_key("prompt_tokens"));
        assert!(!obj.contains_key("metadata"));
    }

    #[test]
    fn test_request_log_document_roundtrip() {
        let mut record = RequestLogRecord::new("req-2", "GET", "/v1/models");
        record.selected_vendor = "openai".to_string();
        record.total_tokens = 42;
        record.headers.insert("content-type".to_string(), "application/json".to_string());

        let text = serde_json::to_string(&record).unwrap();
        let back: RequestLogRecord = serde_json::from_str(&text).unwrap();
        assert_eq!(back, record);
    }
}
