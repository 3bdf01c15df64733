pub mod health;

use crate::observability::RequestLogger;

/// State shared by the gateway's own handlers
#[derive(Clone)]
pub struct AppState {
    pub logger: RequestLogger,
    pub service_name: String,
    pub version: String,
    /// Normalized environment name
    pub environment: String,
}
