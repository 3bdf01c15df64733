//! Request observability for generative-api-router
//!
//! Every request passing through the gateway is:
//! - **Identified**: request and correlation IDs resolved from headers and echoed back
//! - **Logged**: sanitized request and response summaries as structured tracing events
//! - **Persisted**: a request log record written to the store off the request path
//!
//! ## Architecture
//!
//! ```text
//! request ──▶ tracking IDs ──▶ user-agent gate ──▶ handler
//!                                                    │
//!              ResponseCapture (buffer | stream) ◀───┘
//!                     │
//!              sanitize (truncate + redact)
//!                     │
//!              RequestLogger queue ──▶ workers ──▶ store
//! ```
//!
//! Observability never changes what the client receives: status, headers and
//! body are delivered as the handler produced them, plus the two ID headers.

pub mod capture;
pub mod middleware;
pub mod request_logger;
pub mod user_agent;

pub use capture::{
    BufferedSink, CaptureState, CapturedResponse, PassthroughSink, ResponseCapture, ResponseSink,
    MAX_CAPTURE_BYTES,
};
pub use middleware::{
    health_log_level, is_operational_path, observability_middleware, HealthLog,
    ObservabilityState, RoutingOutcome,
};
pub use request_logger::{generate_session_id, PersistJob, PersistenceSettings, RequestLogger};
pub use user_agent::{user_agent_middleware, UserAgentGate};
