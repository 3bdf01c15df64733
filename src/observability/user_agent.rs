use crate::error::AppError;
use crate::observability::middleware::is_operational_path;
use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

/// Optional user-agent prefix requirement
///
/// Disabled when no prefix is configured or the environment is `local`.
/// Operational paths are always let through.
#[derive(Debug, Clone, Default)]
pub struct UserAgentGate {
    prefix: Option<String>,
}

impl UserAgentGate {
    pub fn new(prefix: Option<&str>, environment: &str) -> Self {
        let prefix = prefix
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .filter(|_| !environment.trim().eq_ignore_ascii_case("local"))
            .map(str::to_string);
        Self { prefix }
    }

    pub fn is_enabled(&self) -> bool {
        self.prefix.is_some()
    }

    pub fn allows(&self, path: &str, user_agent: &str) -> bool {
        match &self.prefix {
            None => true,
            Some(_) if is_operational_path(path) => true,
            Some(prefix) => user_agent.starts_with(prefix.as_str()),
        }
    }
}

pub async fn user_agent_middleware(
    State(gate): State<UserAgentGate>,
    req: Request,
    next: Next,
) -> Response {
    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if gate.allows(req.uri().path(), user_agent) {
        return next.run(req).await;
    }

    tracing::warn!(
        reason = "invalid_user_agent",
        method = %req.method(),
        path = %req.uri().path(),
        user_agent = %user_agent,
        "Request blocked by user-agent filter"
    );
    AppError::Forbidden("Access denied: Invalid User-Agent".to_string()).into_response()
}
