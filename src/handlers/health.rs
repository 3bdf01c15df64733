use axum::{extract::State, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

use crate::handlers::AppState;
use crate::store::SystemHealthRecord;

pub const HEALTHY: &str = "healthy";
pub const DEGRADED: &str = "degraded";

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    /// `healthy`, `unhealthy` or `disabled`
    pub database: String,
}

/// Handle /health endpoint
///
/// Always 200; a failing store only degrades the reported status.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let (status, database) = match state.logger.health_check().await {
        None => (HEALTHY, "disabled"),
        Some(Ok(())) => (HEALTHY, HEALTHY),
        Some(Err(e)) => {
            tracing::warn!(error = %e, "Store health check failed");
            (DEGRADED, "unhealthy")
        }
    };

    let mut record = SystemHealthRecord::new(state.environment.as_str(), status, database);
    record.version = state.version.clone();
    state.logger.log_system_health(record);

    Json(HealthResponse {
        status: status.to_string(),
        service: state.service_name,
        version: state.version,
        database: database.to_string(),
    })
}
