//! Response capture
//!
//! [`ResponseCapture`] sits between a downstream handler's output and the real
//! response. Non-streaming bodies are held back and delivered in one write at
//! finalization while a copy of up to [`MAX_CAPTURE_BYTES`] is kept for
//! logging. Server-sent event streams are forwarded chunk by chunk as they are
//! written and never captured.
//!
//! ```text
//! Initial ──write_header──▶ HeaderSet ──write──▶ Buffering ──finalize──▶ Finalized
//!    │                          │
//!    └──────write / flush───────┴──(event-stream)──▶ Streaming ──finalize──▶ Finalized
//! ```
//!
//! Whatever the handler does, the sink sees exactly one head write and at
//! most one body write for buffered responses.

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use std::collections::VecDeque;
use std::io;

/// Cap on the logging copy of a response body
pub const MAX_CAPTURE_BYTES: usize = 10 * 1024;

pub const EVENT_STREAM: &str = "text/event-stream";

/// The real response the capture writes through to
pub trait ResponseSink {
    /// Status line and headers, called exactly once
    fn write_head(&mut self, status: StatusCode, headers: &HeaderMap);

    fn write_body(&mut self, chunk: Bytes) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Initial,
    HeaderSet,
    Buffering,
    Streaming,
    Finalized,
}

/// What the capture observed, handed to the logger after finalization
#[derive(Debug, Clone)]
pub struct CapturedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// Logging copy, at most [`MAX_CAPTURE_BYTES`]; empty for streams
    pub body: Bytes,
    pub is_streaming: bool,
    /// The logging copy dropped bytes past the cap
    pub body_truncated: bool,
    /// Total bytes the handler wrote
    pub bytes_written: usize,
    /// Number of handler writes
    pub chunks: usize,
}

pub fn is_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.to_ascii_lowercase().contains(EVENT_STREAM))
}

pub struct ResponseCapture<S: ResponseSink> {
    sink: S,
    state: CaptureState,
    status: Option<StatusCode>,
    headers: HeaderMap,
    head_written: bool,
    /// Full body awaiting delivery
    pending: Vec<u8>,
    /// Logging copy
    captured: Vec<u8>,
    body_truncated: bool,
    bytes_written: usize,
    chunks: usize,
}

impl<S: ResponseSink> ResponseCapture<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            state: CaptureState::Initial,
            status: None,
            headers: HeaderMap::new(),
            head_written: false,
            pending: Vec::new(),
            captured: Vec::new(),
            body_truncated: false,
            bytes_written: 0,
            chunks: 0,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Headers to send; changes after the head is written have no effect
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Record the status code; the first call wins
    pub fn write_header(&mut self, status: StatusCode) {
        if let Some(existing) = self.status {
            tracing::debug!(
                existing = existing.as_u16(),
                ignored = status.as_u16(),
                "Superfluous write_header call ignored"
            );
            return;
        }

        self.status = Some(status);
        if self.state == CaptureState::Initial {
            self.state = CaptureState::HeaderSet;
        }
    }

    /// Accept a body chunk
    ///
    /// The first write picks buffering or streaming from the content type.
    /// Buffered writes always report the full length as written.
    pub fn write(&mut self, chunk: Bytes) -> io::Result<usize> {
        let len = chunk.len();
        if self.status.is_none() {
            self.write_header(StatusCode::OK);
        }

        if matches!(self.state, CaptureState::Initial | CaptureState::HeaderSet) {
            self.state = if is_event_stream(&self.headers) {
                CaptureState::Streaming
            } else {
                CaptureState::Buffering
            };
        }

        self.chunks += 1;
        self.bytes_written += len;

        match self.state {
            CaptureState::Streaming => {
                self.ensure_head();
                self.sink.write_body(chunk)?;
            }
            CaptureState::Buffering => {
                self.pending.extend_from_slice(&chunk);
                self.capture(&chunk);
            }
            CaptureState::Initial | CaptureState::HeaderSet | CaptureState::Finalized => {
                return Err(io::Error::other("write on finalized response"));
            }
        }

        Ok(len)
    }

    /// Push pending stream bytes to the client
    ///
    /// An event-stream response that has not written yet starts streaming
    /// here, so the head reaches the client before the first event.
    pub fn flush(&mut self) -> io::Result<()> {
        match self.state {
            CaptureState::Streaming => self.sink.flush(),
            CaptureState::Initial | CaptureState::HeaderSet if is_event_stream(&self.headers) => {
                if self.status.is_none() {
                    self.write_header(StatusCode::OK);
                }
                self.state = CaptureState::Streaming;
                self.ensure_head();
                self.sink.flush()
            }
            _ => Ok(()),
        }
    }

    /// Write the head if it has not been written, then the buffered body
    ///
    /// Consumes the capture, so a response is finalized once.
    pub fn finalize(mut self) -> io::Result<(S, CapturedResponse)> {
        self.ensure_head();

        let is_streaming = self.state == CaptureState::Streaming;
        if self.state == CaptureState::Buffering {
            let body = Bytes::from(std::mem::take(&mut self.pending));
            self.sink.write_body(body)?;
        }
        self.state = CaptureState::Finalized;

        let captured = CapturedResponse {
            status: self.status.unwrap_or(StatusCode::OK),
            headers: self.headers,
            body: Bytes::from(self.captured),
            is_streaming,
            body_truncated: self.body_truncated,
            bytes_written: self.bytes_written,
            chunks: self.chunks,
        };

        Ok((self.sink, captured))
    }

    fn ensure_head(&mut self) {
        if self.head_written {
            return;
        }
        let status = *self.status.get_or_insert(StatusCode::OK);
        self.sink.write_head(status, &self.headers);
        self.head_written = true;
    }

    fn capture(&mut self, chunk: &[u8]) {
        let room = MAX_CAPTURE_BYTES.saturating_sub(self.captured.len());
        if chunk.len() > room {
            self.body_truncated = true;
        }
        self.captured.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }
}

/// Sink for buffered responses: records the head and body, then becomes the
/// outgoing [`Response`]
#[derive(Debug, Default)]
pub struct BufferedSink {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: Bytes,
    head_writes: usize,
    body_writes: usize,
}

impl BufferedSink {
    pub fn head_writes(&self) -> usize {
        self.head_writes
    }

    pub fn body_writes(&self) -> usize {
        self.body_writes
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status.unwrap_or(StatusCode::OK);
        *response.headers_mut() = self.headers;
        response
    }
}

impl ResponseSink for BufferedSink {
    fn write_head(&mut self, status: StatusCode, headers: &HeaderMap) {
        self.status = Some(status);
        self.headers = headers.clone();
        self.head_writes += 1;
    }

    fn write_body(&mut self, chunk: Bytes) -> io::Result<()> {
        self.body = chunk;
        self.body_writes += 1;
        Ok(())
    }
}

/// Sink for streaming responses: a queue of chunks in write order, drained by
/// the outgoing body stream
#[derive(Debug, Default)]
pub struct PassthroughSink {
    head: Option<(StatusCode, HeaderMap)>,
    queue: VecDeque<Bytes>,
    flushes: usize,
}

impl PassthroughSink {
    pub fn head(&self) -> Option<(StatusCode, &HeaderMap)> {
        self.head.as_ref().map(|(status, headers)| (*status, headers))
    }

    pub fn pop_chunk(&mut self) -> Option<Bytes> {
        self.queue.pop_front()
    }

    pub fn flushes(&self) -> usize {
        self.flushes
    }
}

impl ResponseSink for PassthroughSink {
    fn write_head(&mut self, status: StatusCode, headers: &HeaderMap) {
        self.head = Some((status, headers.clone()));
    }

    fn write_body(&mut self, chunk: Bytes) -> io::Result<()> {
        if !chunk.is_empty() {
            self.queue.push_back(chunk);
        }
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flushes += 1;
        Ok(())
    }
}
