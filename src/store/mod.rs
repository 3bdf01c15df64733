//! Document store for request telemetry
//!
//! Four collections, each a table keyed by indexed scalar columns with the
//! full record kept as a JSON document:
//! - `request_logs`: one record per proxied request
//! - `vendor_metrics`: aggregated per vendor/model/period
//! - `system_health`: periodic service health snapshots
//! - `user_sessions`: one mutable record per session, merged on upsert

pub mod config;
pub mod connection;
pub mod models;
pub mod repository;

pub use self::config::{mask_uri_credentials, DatabaseConfig, DEFAULT_SERVICE_NAME};
pub use connection::{ConnectionManager, StoreConnection};
pub use models::{RequestLogRecord, SystemHealthRecord, UserSessionRecord, VendorMetricsRecord};
pub use repository::{
    RequestLogRepository, SystemHealthRepository, UserSessionRepository, VendorMetricsRepository,
};

use std::time::Duration;
use thiserror::Error;

/// Bound on the startup connect + ping
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Bound on a single health ping
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(2);
/// Bound on a single record insert or upsert
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(5);
/// Bound on closing the pool during shutdown
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors raised by the persistence layer
#[derive(Debug, Error)]
pub enum StoreError {
    /// No usable store URI
    #[error("store configuration error: {0}")]
    Config(String),

    /// Pool could not be opened or the liveness ping failed
    #[error("failed to connect to store: {0}")]
    Connect(String),

    /// Operation exceeded its time bound
    #[error("{operation} timed out after {}ms", .after.as_millis())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("store query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error("store migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Persistence is switched off for this process
    #[error("persistence is disabled")]
    Disabled,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Run `fut` under `after`, mapping expiry to [`StoreError::Timeout`]
pub(crate) async fn with_timeout<T, F>(
    operation: &'static str,
    after: Duration,
    fut: F,
) -> StoreResult<T>
where
    F: std::future::Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout { operation, after }),
    }
}
