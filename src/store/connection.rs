//! Store connection lifecycle
//!
//! [`StoreConnection`] owns the pool; [`ConnectionManager`] builds it lazily,
//! exactly once per process, and hands out shared handles.

use super::config::DatabaseConfig;
use super::repository::{
    RequestLogRepository, SystemHealthRepository, UserSessionRepository, VendorMetricsRepository,
};
use super::{
    with_timeout, StoreError, StoreResult, CONNECT_TIMEOUT, DISCONNECT_TIMEOUT,
    HEALTH_CHECK_TIMEOUT,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

/// Secondary indexes, created after connecting. Failures are not fatal.
const INDEXES: &[(&str, &str)] = &[
    (
        "request_logs_request_id",
        "CREATE INDEX IF NOT EXISTS request_logs_request_id ON request_logs (request_id)",
    ),
    (
        "request_logs_timestamp_desc",
        "CREATE INDEX IF NOT EXISTS request_logs_timestamp_desc ON request_logs (timestamp DESC)",
    ),
    (
        "request_logs_vendor_timestamp_desc",
        "CREATE INDEX IF NOT EXISTS request_logs_vendor_timestamp_desc ON request_logs (selected_vendor, timestamp DESC)",
    ),
    (
        "request_logs_status_created_at_desc",
        "CREATE INDEX IF NOT EXISTS request_logs_status_created_at_desc ON request_logs (status_code, created_at DESC)",
    ),
    (
        "vendor_metrics_period",
        "CREATE INDEX IF NOT EXISTS vendor_metrics_period ON vendor_metrics (vendor, model, period_type, period_start DESC)",
    ),
    (
        "system_health_env_timestamp_desc",
        "CREATE INDEX IF NOT EXISTS system_health_env_timestamp_desc ON system_health (environment, timestamp DESC)",
    ),
    (
        "user_sessions_last_seen_desc",
        "CREATE INDEX IF NOT EXISTS user_sessions_last_seen_desc ON user_sessions (last_seen DESC)",
    ),
];

/// Live store handle
///
/// Cheap to share behind an `Arc`; the pool serializes concurrent use.
#[derive(Debug)]
pub struct StoreConnection {
    pool: SqlitePool,
    config: DatabaseConfig,
}

impl StoreConnection {
    /// Open the pool, verify liveness and apply the schema, all within 10s
    pub async fn connect(config: DatabaseConfig) -> StoreResult<Self> {
        let masked = config.mask_sensitive_data();
        tracing::info!(
            database = %masked.database_name,
            uri = %masked.uri,
            "Connecting to store"
        );

        let conn = with_timeout("store connect", CONNECT_TIMEOUT, Self::open(config)).await?;

        tracing::info!(database = %conn.config.database_name, "Connected to store");
        Ok(conn)
    }

    async fn open(config: DatabaseConfig) -> StoreResult<Self> {
        let connection_string = config.connection_string();
        let in_memory = connection_string.contains(":memory:");

        let mut options = SqliteConnectOptions::from_str(&connection_string)
            .map_err(|e| StoreError::Config(e.to_string()))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        let mut pool_options = SqlitePoolOptions::new().acquire_timeout(CONNECT_TIMEOUT);

        if in_memory {
            // Every connection to :memory: is its own database; keep exactly one alive
            pool_options = pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        } else {
            options = options
                .journal_mode(SqliteJournalMode::Wal)
                .pragma("synchronous", "NORMAL");
            pool_options = pool_options.max_connections(5);

            if let Some(parent) = options.get_filename().parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await.map_err(|e| {
                        StoreError::Config(format!(
                            "failed to create store directory {}: {}",
                            parent.display(),
                            e
                        ))
                    })?;
                }
            }
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connect(e.to_string()))?;

        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .map_err(|e| StoreError::Connect(format!("ping failed: {}", e)))?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        let conn = Self { pool, config };
        if let Err(e) = conn.create_indexes().await {
            tracing::warn!(error = %e, "Failed to create store indexes");
        }

        Ok(conn)
    }

    async fn create_indexes(&self) -> StoreResult<()> {
        for &(name, statement) in INDEXES {
            sqlx::query(statement).execute(&self.pool).await?;
            tracing::debug!(index = name, "Store index ready");
        }
        Ok(())
    }

    /// Ping the store within 2s
    pub async fn health_check(&self) -> StoreResult<()> {
        with_timeout("store health check", HEALTH_CHECK_TIMEOUT, async {
            sqlx::query("SELECT 1").execute(&self.pool).await?;
            Ok(())
        })
        .await
    }

    pub async fn is_connected(&self) -> bool {
        !self.pool.is_closed() && self.health_check().await.is_ok()
    }

    /// Close the pool, waiting at most 5s for checked-out connections
    pub async fn disconnect(&self) -> StoreResult<()> {
        with_timeout("store disconnect", DISCONNECT_TIMEOUT, async {
            self.pool.close().await;
            Ok(())
        })
        .await
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn request_logs(&self) -> RequestLogRepository<'_> {
        RequestLogRepository::new(&self.pool)
    }

    pub fn vendor_metrics(&self) -> VendorMetricsRepository<'_> {
        VendorMetricsRepository::new(&self.pool)
    }

    pub fn system_health(&self) -> SystemHealthRepository<'_> {
        SystemHealthRepository::new(&self.pool)
    }

    pub fn user_sessions(&self) -> UserSessionRepository<'_> {
        UserSessionRepository::new(&self.pool)
    }
}

/// Result of the one-time connection attempt, shared by every caller
pub type SharedConnection = Result<Arc<StoreConnection>, Arc<StoreError>>;

/// Lazily-initialized, process-wide store handle
///
/// The first caller of [`get_connection`](Self::get_connection) performs the
/// connection attempt; concurrent callers wait for it and every later caller
/// receives the same handle or the same error.
#[derive(Debug)]
pub struct ConnectionManager {
    config: Option<DatabaseConfig>,
    cell: OnceCell<SharedConnection>,
}

impl ConnectionManager {
    pub fn new(config: Option<DatabaseConfig>) -> Self {
        Self {
            config,
            cell: OnceCell::new(),
        }
    }

    pub fn config(&self) -> Option<&DatabaseConfig> {
        self.config.as_ref()
    }

    pub async fn get_connection(&self) -> SharedConnection {
        self.cell
            .get_or_init(|| async {
                let Some(config) = self.config.clone() else {
                    return Err(Arc::new(StoreError::Config(
                        "no store URI configured".to_string(),
                    )));
                };

                StoreConnection::connect(config)
                    .await
                    .map(Arc::new)
                    .map_err(|e| {
                        tracing::warn!(error = %e, "Store connection failed");
                        Arc::new(e)
                    })
            })
            .await
            .clone()
    }

    /// The handle if a connection attempt already succeeded
    pub fn connection(&self) -> Option<Arc<StoreConnection>> {
        match self.cell.get() {
            Some(Ok(conn)) => Some(conn.clone()),
            _ => None,
        }
    }

    /// Close the pool if it was ever opened
    pub async fn disconnect(&self) {
        if let Some(conn) = self.connection() {
            match conn.disconnect().await {
                Ok(()) => tracing::info!("Store connection closed"),
                Err(e) => tracing::warn!(error = %e, "Failed to close store connection"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_config() -> DatabaseConfig {
        DatabaseConfig::new("sqlite::memory:", "test", "router")
    }

    #[tokio::test]
    async fn test_connect_in_memory() {
        let conn = StoreConnection::connect(memory_config()).await.unwrap();
        assert!(conn.health_check().await.is_ok());
        assert!(conn.is_connected().await);
        assert_eq!(conn.config().database_name, "test-router");
    }

    #[tokio::test]
    async fn test_disconnect_marks_unhealthy() {
        let conn = StoreConnection::connect(memory_config()).await.unwrap();
        conn.disconnect().await.unwrap();
        assert!(!conn.is_connected().await);
        assert!(conn.health_check().await.is_err());
    }

    #[tokio::test]
    async fn test_connect_file_backed_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let uri = format!("sqlite://{}/nested", dir.path().display());
        let config = DatabaseConfig::new(uri, "production", "go-router");

        let conn = StoreConnection::connect(config).await.unwrap();
        assert!(conn.is_connected().await);
        assert!(dir.path().join("nested").join("prod-router.db").exists());
        conn.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_manager_initializes_once() {
        let manager = Arc::new(ConnectionManager::new(Some(memory_config())));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.get_connection().await })
            })
            .collect();

        let mut conns = Vec::new();
        for handle in handles {
            conns.push(handle.await.unwrap().unwrap());
        }

        for conn in &conns[1..] {
            assert!(Arc::ptr_eq(&conns[0], conn));
        }
        assert!(manager.connection().is_some());
    }

    #[tokio::test]
    async fn test_manager_without_config_reports_same_error() {
        let manager = ConnectionManager::new(None);
        let first = manager.get_connection().await.unwrap_err();
        let second = manager.get_connection().await.unwrap_err();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(matches!(*first, StoreError::Config(_)));
        assert!(manager.connection().is_none());
        // Nothing to close
        manager.disconnect().await;
    }
}
