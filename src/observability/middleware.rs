use crate::error::AppError;
use crate::observability::capture::{
    is_event_stream, BufferedSink, CapturedResponse, PassthroughSink, ResponseCapture,
};
use crate::observability::request_logger::{generate_session_id, RequestLogger};
use crate::sanitize::{log_headers, persisted_headers, sanitize, sanitize_str};
use crate::store::RequestLogRecord;
use crate::tracking::{self, TrackingIds, CORRELATION_ID_HEADER, REQUEST_ID_HEADER};
use axum::body::{Body, BodyDataStream, Bytes};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde_json::{json, Map, Value};
use std::net::SocketAddr;
use std::time::Instant;

/// Operational endpoints: quiet logging and no user-agent check
pub const OPERATIONAL_PATHS: &[&str] = &["/health", "/swagger", "/swagger/", "/debug/pprof/"];

pub const STREAMING_PLACEHOLDER: &str = "[STREAMING_RESPONSE]";
pub const NON_JSON_PLACEHOLDER: &str = "[NON_JSON_BODY]";

/// Exact or prefix match against [`OPERATIONAL_PATHS`]
pub fn is_operational_path(path: &str) -> bool {
    OPERATIONAL_PATHS
        .iter()
        .any(|allowed| path == *allowed || path.starts_with(allowed))
}

/// What a vendor handler decided, attached to its response extensions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingOutcome {
    pub vendor: String,
    pub model: String,
    pub original_model: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub error_message: String,
    pub error_type: String,
}

/// Log level for a finished health check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthLog {
    Silent,
    Warn,
    Error,
}

/// Errors always log; a 2xx whose body reports a non-healthy status warns
pub fn health_log_level(status: StatusCode, body: &[u8]) -> HealthLog {
    if status.as_u16() >= 400 {
        return HealthLog::Error;
    }

    let reported = serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|v| v.get("status").and_then(Value::as_str).map(str::to_owned));

    match reported {
        Some(status) if status != "healthy" => HealthLog::Warn,
        _ => HealthLog::Silent,
    }
}

/// Sanitized structured body for logs, or a placeholder
pub fn body_for_log(body: &[u8]) -> Value {
    if body.is_empty() {
        return Value::String(String::new());
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(parsed) => sanitize(&parsed),
        Err(_) => Value::String(NON_JSON_PLACEHOLDER.to_string()),
    }
}

fn body_for_record(logged: &Value) -> String {
    match logged {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Shared state of the observability middleware
#[derive(Clone)]
pub struct ObservabilityState {
    pub logger: RequestLogger,
    pub environment: String,
    pub version: String,
    /// Dump sanitized non-JSON bodies at debug level
    pub verbose: bool,
    pub max_body_bytes: usize,
}

fn set_tracking_headers(headers: &mut HeaderMap, ids: &TrackingIds) {
    if let Ok(value) = HeaderValue::from_str(&ids.request_id) {
        headers.insert(REQUEST_ID_HEADER, value);
    }
    if let Ok(value) = HeaderValue::from_str(&ids.correlation_id) {
        headers.insert(CORRELATION_ID_HEADER, value);
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: header::HeaderName) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

/// Resolve tracking IDs, log the request, capture the response and hand the
/// finished record to the persistence gateway
pub async fn observability_middleware(
    State(state): State<ObservabilityState>,
    req: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let timestamp = Utc::now();
    let ids = tracking::resolve(req.headers());

    let remote = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let (mut parts, body) = req.into_parts();

    let method = parts.method.clone();
    let path = parts.uri.path().to_string();

    let request_body = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(
                request_id = %ids.request_id,
                method = %method,
                path = %path,
                error = %e,
                "Failed to read request body"
            );
            let mut response =
                AppError::BadRequest("Failed to read request body".to_string()).into_response();
            set_tracking_headers(response.headers_mut(), &ids);
            return response;
        }
    };

    let user_agent = header_str(&parts.headers, header::USER_AGENT).to_string();
    let client_ip = tracking::client_ip(&parts.headers, remote);
    let operational = is_operational_path(&path);
    let logged_request_body = body_for_log(&request_body);

    if !operational {
        tracing::info!(
            request_id = %ids.request_id,
            correlation_id = %ids.correlation_id,
            request_id_source = %ids.request_id_source,
            correlation_id_source = %ids.correlation_id_source,
            method = %method,
            path = %path,
            query = parts.uri.query().unwrap_or_default(),
            user_agent = %user_agent,
            client_ip = %client_ip,
            content_length = request_body.len(),
            headers = ?log_headers(&parts.headers),
            body = %logged_request_body,
            "Request received"
        );
        if state.verbose && logged_request_body == NON_JSON_PLACEHOLDER {
            tracing::debug!(
                request_id = %ids.request_id,
                body = %sanitize_str(&String::from_utf8_lossy(&request_body)),
                "Request body"
            );
        }
    }

    let request_headers = persisted_headers(&parts.headers);
    parts.extensions.insert(ids.clone());
    let req = Request::from_parts(parts, Body::from(request_body.clone()));

    let response = next.run(req).await;
    let (resp_parts, resp_body) = response.into_parts();
    let outcome = resp_parts
        .extensions
        .get::<RoutingOutcome>()
        .cloned()
        .unwrap_or_default();

    let mut headers = resp_parts.headers;
    set_tracking_headers(&mut headers, &ids);
    let streaming = is_event_stream(&headers);

    let completion = Completion {
        state,
        ids,
        method,
        path,
        user_agent,
        client_ip,
        request_headers,
        logged_request_body,
        outcome,
        operational,
        start,
        timestamp,
    };

    if streaming {
        let mut capture = ResponseCapture::new(PassthroughSink::default());
        *capture.headers_mut() = headers;
        capture.write_header(resp_parts.status);
        // Puts the head on the sink before the first event
        if let Err(e) = capture.flush() {
            tracing::warn!(request_id = %completion.ids.request_id, error = %e, "Failed to start event stream");
        }

        let (status, headers) = match capture.sink().head() {
            Some((status, headers)) => (status, headers.clone()),
            None => (resp_parts.status, capture.headers().clone()),
        };

        let stream = StreamState {
            capture: Some(capture),
            upstream: resp_body.into_data_stream(),
            completion: Some(completion),
            done: false,
        };

        let mut response = Response::new(Body::from_stream(futures::stream::unfold(
            stream,
            next_stream_chunk,
        )));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        *response.extensions_mut() = resp_parts.extensions;
        return response;
    }

    let mut capture = ResponseCapture::new(BufferedSink::default());
    *capture.headers_mut() = headers;
    capture.write_header(resp_parts.status);

    let mut upstream = resp_body.into_data_stream();
    while let Some(frame) = upstream.next().await {
        match frame {
            Ok(chunk) => {
                if let Err(e) = capture.write(chunk) {
                    tracing::error!(request_id = %completion.ids.request_id, error = %e, "Failed to buffer response body");
                }
            }
            Err(e) => {
                tracing::error!(
                    request_id = %completion.ids.request_id,
                    error = %e,
                    "Downstream response body failed"
                );
                let ids = completion.ids.clone();
                let mut response =
                    AppError::InternalError("Response body failed".to_string()).into_response();
                set_tracking_headers(response.headers_mut(), &ids);

                // Log and persist what the client actually got, with the bytes read so far
                match capture.finalize() {
                    Ok((_, mut captured)) => {
                        captured.status = response.status();
                        completion.finish(&captured, Some(e.to_string()));
                    }
                    Err(finalize_err) => tracing::error!(
                        request_id = %ids.request_id,
                        error = %finalize_err,
                        "Failed to finalize failed response"
                    ),
                }
                return response;
            }
        }
    }

    match capture.finalize() {
        Ok((sink, captured)) => {
            completion.finish(&captured, None);
            let mut response = sink.into_response();
            *response.extensions_mut() = resp_parts.extensions;
            response
        }
        Err(e) => {
            let ids = completion.ids.clone();
            tracing::error!(request_id = %ids.request_id, error = %e, "Failed to finalize response");
            let mut response =
                AppError::InternalError("Failed to finalize response".to_string()).into_response();
            set_tracking_headers(response.headers_mut(), &ids);
            response
        }
    }
}

/// Everything needed to log and persist a request once its response is done
struct Completion {
    state: ObservabilityState,
    ids: TrackingIds,
    method: Method,
    path: String,
    user_agent: String,
    client_ip: String,
    request_headers: std::collections::BTreeMap<String, String>,
    logged_request_body: Value,
    outcome: RoutingOutcome,
    operational: bool,
    start: Instant,
    timestamp: DateTime<Utc>,
}

impl Completion {
    fn finish(self, captured: &CapturedResponse, stream_error: Option<String>) {
        let duration_ms = self.start.elapsed().as_millis() as i64;
        let status = captured.status;

        if self.operational {
            self.log_operational(captured, duration_ms);
            return;
        }

        let logged_response_body = if captured.is_streaming {
            Value::String(STREAMING_PLACEHOLDER.to_string())
        } else {
            body_for_log(&captured.body)
        };

        if status.as_u16() >= 400 {
            tracing::error!(
                request_id = %self.ids.request_id,
                correlation_id = %self.ids.correlation_id,
                method = %self.method,
                path = %self.path,
                status = status.as_u16(),
                duration_ms,
                content_length = captured.bytes_written,
                streaming = captured.is_streaming,
                headers = ?log_headers(&captured.headers),
                body = %logged_response_body,
                "Request completed"
            );
        } else {
            tracing::info!(
                request_id = %self.ids.request_id,
                correlation_id = %self.ids.correlation_id,
                method = %self.method,
                path = %self.path,
                status = status.as_u16(),
                duration_ms,
                content_length = captured.bytes_written,
                streaming = captured.is_streaming,
                headers = ?log_headers(&captured.headers),
                body = %logged_response_body,
                "Request completed"
            );
        }

        if self.state.verbose && !captured.is_streaming && logged_response_body == NON_JSON_PLACEHOLDER {
            tracing::debug!(
                request_id = %self.ids.request_id,
                body = %sanitize_str(&String::from_utf8_lossy(&captured.body)),
                "Response body"
            );
        }

        if self.state.logger.is_enabled() {
            let record = self.into_record(captured, duration_ms, &logged_response_body, stream_error);
            self.state.logger.log_request(record);
        }
    }

    fn log_operational(&self, captured: &CapturedResponse, duration_ms: i64) {
        let status = captured.status.as_u16();
        match health_log_level(captured.status, &captured.body) {
            HealthLog::Silent => tracing::debug!(
                path = %self.path,
                status,
                duration_ms,
                "Health check"
            ),
            HealthLog::Warn => tracing::warn!(
                path = %self.path,
                status,
                duration_ms,
                body = %String::from_utf8_lossy(&captured.body),
                "Health check reported unhealthy status"
            ),
            HealthLog::Error => tracing::error!(
                path = %self.path,
                status,
                duration_ms,
                body = %String::from_utf8_lossy(&captured.body),
                "Health check failed"
            ),
        }
    }

    fn into_record(
        &self,
        captured: &CapturedResponse,
        duration_ms: i64,
        logged_response_body: &Value,
        stream_error: Option<String>,
    ) -> RequestLogRecord {
        let mut record = RequestLogRecord::new(
            self.ids.request_id.clone(),
            self.method.as_str(),
            self.path.clone(),
        );
        record.correlation_id = self.ids.correlation_id.clone();
        record.session_id = generate_session_id(&self.user_agent, &self.client_ip);
        record.timestamp = self.timestamp;
        record.user_agent = self.user_agent.clone();
        record.client_ip = self.client_ip.clone();
        record.headers = self.request_headers.clone();
        record.request_body = body_for_record(&self.logged_request_body);

        record.original_model = if self.outcome.original_model.is_empty() {
            self.logged_request_body
                .get("model")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        } else {
            self.outcome.original_model.clone()
        };
        record.selected_vendor = self.outcome.vendor.clone();
        record.selected_model = self.outcome.model.clone();
        record.prompt_tokens = self.outcome.prompt_tokens;
        record.completion_tokens = self.outcome.completion_tokens;
        record.total_tokens = self.outcome.total_tokens;

        record.status_code = captured.status.as_u16();
        record.response_body = body_for_record(logged_response_body);
        record.duration_ms = duration_ms;
        record.is_streaming = captured.is_streaming;
        if captured.is_streaming {
            record.stream_chunks = captured.chunks as i64;
        }

        record.error_message = self.outcome.error_message.clone();
        record.error_type = self.outcome.error_type.clone();
        if let Some(error) = stream_error {
            if record.error_message.is_empty() {
                record.error_message = error;
                record.error_type = "stream_error".to_string();
            }
        }

        record.environment = self.state.environment.clone();
        record.version = self.state.version.clone();

        let mut metadata = Map::new();
        metadata.insert("request_id_source".to_string(), json!(self.ids.request_id_source));
        metadata.insert(
            "correlation_id_source".to_string(),
            json!(self.ids.correlation_id_source),
        );
        if captured.body_truncated {
            metadata.insert("response_body_truncated".to_string(), Value::Bool(true));
        }
        record.metadata = metadata;

        record
    }
}

/// Pull-based state of a streamed response body
struct StreamState {
    capture: Option<ResponseCapture<PassthroughSink>>,
    upstream: BodyDataStream,
    completion: Option<Completion>,
    done: bool,
}

impl StreamState {
    fn finish(&mut self, error: Option<String>) {
        let (Some(capture), Some(completion)) = (self.capture.take(), self.completion.take()) else {
            return;
        };
        match capture.finalize() {
            Ok((_, captured)) => completion.finish(&captured, error),
            Err(e) => tracing::error!(
                request_id = %completion.ids.request_id,
                error = %e,
                "Failed to finalize streaming response"
            ),
        }
    }
}

impl Drop for StreamState {
    fn drop(&mut self) {
        if let Some(completion) = &self.completion {
            tracing::warn!(
                request_id = %completion.ids.request_id,
                "Streaming response closed before completion"
            );
            self.finish(Some("client disconnected before stream completed".to_string()));
        }
    }
}

async fn next_stream_chunk(mut stream: StreamState) -> Option<(Result<Bytes, axum::Error>, StreamState)> {
    loop {
        if stream.done {
            return None;
        }

        if let Some(chunk) = stream
            .capture
            .as_mut()
            .and_then(|capture| capture.sink_mut().pop_chunk())
        {
            return Some((Ok(chunk), stream));
        }

        match stream.upstream.next().await {
            Some(Ok(chunk)) => {
                if let Some(capture) = stream.capture.as_mut() {
                    if let Err(e) = capture.write(chunk).and_then(|_| capture.flush()) {
                        tracing::warn!(error = %e, "Failed to forward stream chunk");
                    }
                }
            }
            Some(Err(e)) => {
                tracing::error!(error = %e, "Downstream stream failed");
                stream.finish(Some(e.to_string()));
                stream.done = true;
                return Some((Err(e), stream));
            }
            None => {
                stream.finish(None);
                stream.done = true;
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operational_paths() {
        assert!(is_operational_path("/health"));
        assert!(is_operational_path("/swagger"));
        assert!(is_operational_path("/swagger/index.html"));
        assert!(is_operational_path("/debug/pprof/heap"));
        assert!(!is_operational_path("/v1/chat/completions"));
        assert!(!is_operational_path("/debug"));
    }

    #[test]
    fn test_health_log_level() {
        assert_eq!(
            health_log_level(StatusCode::OK, br#"{"status":"healthy"}"#),
            HealthLog::Silent
        );
        assert_eq!(health_log_level(StatusCode::OK, b"ok"), HealthLog::Silent);
        assert_eq!(health_log_level(StatusCode::OK, br#"{"uptime":5}"#), HealthLog::Silent);
        assert_eq!(
            health_log_level(StatusCode::OK, br#"{"status":"degraded"}"#),
            HealthLog::Warn
        );
        assert_eq!(
            health_log_level(StatusCode::SERVICE_UNAVAILABLE, br#"{"status":"healthy"}"#),
            HealthLog::Error
        );
    }

    #[test]
    fn test_body_for_log() {
        assert_eq!(body_for_log(b""), Value::String(String::new()));
        assert_eq!(body_for_log(b"plain text"), json!(NON_JSON_PLACEHOLDER));

        let logged = body_for_log(br#"{"model":"gpt-4o","api_key":"sk-abcdefghijklmnopqrstuvwxyz"}"#);
        assert_eq!(logged["model"], "gpt-4o");
        assert_eq!(logged["api_key"], crate::sanitize::MASK);
    }

    #[test]
    fn test_body_for_record() {
        assert_eq!(body_for_record(&json!("")), "");
        assert_eq!(body_for_record(&json!(STREAMING_PLACEHOLDER)), STREAMING_PLACEHOLDER);
        assert_eq!(body_for_record(&json!({"a": 1})), r#"{"a":1}"#);
    }
}
