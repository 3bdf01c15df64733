//! Per-collection repositories
//!
//! Repositories borrow the pool owned by [`StoreConnection`](super::StoreConnection)
//! and hold no state of their own. Time bounds are applied by the caller.

use super::models::{RequestLogRecord, SystemHealthRecord, UserSessionRecord, VendorMetricsRecord};
use super::StoreResult;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn decode_documents<T: DeserializeOwned>(rows: Vec<SqliteRow>) -> StoreResult<Vec<T>> {
    rows.iter()
        .map(|row| -> StoreResult<T> {
            let document: String = row.try_get("document")?;
            Ok(serde_json::from_str(&document)?)
        })
        .collect()
}

/// `request_logs` collection
pub struct RequestLogRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> RequestLogRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a request log, stamping `created_at`/`updated_at`
    pub async fn insert(&self, mut record: RequestLogRecord) -> StoreResult<()> {
        let now = Utc::now();
        record.created_at = now;
        record.updated_at = now;
        let document = serde_json::to_string(&record)?;

        sqlx::query(
            "INSERT INTO request_logs
                (request_id, correlation_id, timestamp, selected_vendor, status_code, environment, created_at, document)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.request_id)
        .bind(&record.correlation_id)
        .bind(record.timestamp.timestamp_millis())
        .bind(&record.selected_vendor)
        .bind(record.status_code as i64)
        .bind(&record.environment)
        .bind(now.timestamp_millis())
        .bind(&document)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    pub async fn find_by_request_id(&self, request_id: &str) -> StoreResult<Option<RequestLogRecord>> {
        let rows = sqlx::query(
            "SELECT document FROM request_logs WHERE request_id = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(request_id)
        .fetch_all(self.pool)
        .await?;

        Ok(decode_documents(rows)?.into_iter().next())
    }

    /// Most recent first
    pub async fn recent(&self, limit: i64, offset: i64) -> StoreResult<Vec<RequestLogRecord>> {
        let rows = sqlx::query(
            "SELECT document FROM request_logs ORDER BY timestamp DESC, id DESC LIMIT ? OFFSET ?",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool)
        .await?;

        decode_documents(rows)
    }

    pub async fn by_vendor(&self, vendor: &str, limit: i64) -> StoreResult<Vec<RequestLogRecord>> {
        let rows = sqlx::query(
            "SELECT document FROM request_logs
             WHERE selected_vendor = ?
             ORDER BY timestamp DESC, id DESC LIMIT ?",
        )
        .bind(vendor)
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        decode_documents(rows)
    }

    /// Logs with `start <= timestamp <= end`, most recent first
    pub async fn by_time_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<RequestLogRecord>> {
        let rows = sqlx::query(
            "SELECT document FROM request_logs
             WHERE timestamp >= ? AND timestamp <= ?
             ORDER BY timestamp DESC, id DESC LIMIT ?",
        )
        .bind(start.timestamp_millis())
        .bind(end.timestamp_millis())
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        decode_documents(rows)
    }
}

/// `vendor_metrics` collection
pub struct VendorMetricsRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> VendorMetricsRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, mut record: VendorMetricsRecord) -> StoreResult<()> {
        let now = Utc::now();
        record.created_at = now;
        record.updated_at = now;
        let document = serde_json::to_string(&record)?;

        sqlx::query(
            "INSERT INTO vendor_metrics
                (vendor, model, environment, period_type, period_start, period_end, created_at, document)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.vendor)
        .bind(&record.model)
        .bind(&record.environment)
        .bind(&record.period_type)
        .bind(record.period_start.timestamp_millis())
        .bind(record.period_end.timestamp_millis())
        .bind(now.timestamp_millis())
        .bind(&document)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Periods of `period_type` lying within `[start, end]`, latest first
    pub async fn by_period(
        &self,
        vendor: &str,
        model: &str,
        period_type: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<VendorMetricsRecord>> {
        let rows = sqlx::query(
            "SELECT document FROM vendor_metrics
             WHERE vendor = ? AND model = ? AND period_type = ?
               AND period_start >= ? AND period_end <= ?
             ORDER BY period_start DESC",
        )
        .bind(vendor)
        .bind(model)
        .bind(period_type)
        .bind(start.timestamp_millis())
        .bind(end.timestamp_millis())
        .fetch_all(self.pool)
        .await?;

        decode_documents(rows)
    }
}

/// `system_health` collection
pub struct SystemHealthRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> SystemHealthRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, mut record: SystemHealthRecord) -> StoreResult<()> {
        let now = Utc::now();
        record.created_at = now;
        let document = serde_json::to_string(&record)?;

        sqlx::query(
            "INSERT INTO system_health (environment, timestamp, created_at, document)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&record.environment)
        .bind(record.timestamp.timestamp_millis())
        .bind(now.timestamp_millis())
        .bind(&document)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    pub async fn latest(&self, environment: &str) -> StoreResult<Option<SystemHealthRecord>> {
        let rows = sqlx::query(
            "SELECT document FROM system_health
             WHERE environment = ?
             ORDER BY timestamp DESC, id DESC LIMIT 1",
        )
        .bind(environment)
        .fetch_all(self.pool)
        .await?;

        Ok(decode_documents(rows)?.into_iter().next())
    }
}

/// `user_sessions` collection
pub struct UserSessionRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> UserSessionRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Create or merge a session in one statement
    ///
    /// On insert the counter starts at 1 and both first-seen and last-seen are
    /// now. On conflict the counter is incremented, last-seen moves, tokens
    /// accumulate and the model/vendor lists become the union of stored and
    /// incoming values. `first_seen` and `created_at` are never overwritten.
    pub async fn upsert(&self, session: &UserSessionRecord) -> StoreResult<()> {
        let now = Utc::now().timestamp_millis();
        let models = serde_json::to_string(&session.models_used)?;
        let vendors = serde_json::to_string(&session.vendors_used)?;
        let metadata = if session.metadata.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&session.metadata)?)
        };

        sqlx::query(
            "INSERT INTO user_sessions
                (session_id, user_agent, client_ip, environment, first_seen, last_seen,
                 request_count, models_used, vendors_used, total_tokens, metadata, created_at, updated_at)
             VALUES (
                ?1, ?2, ?3, ?4, ?5, ?5, 1,
                (SELECT json_group_array(DISTINCT value) FROM json_each(?6)),
                (SELECT json_group_array(DISTINCT value) FROM json_each(?7)),
                ?8, ?9, ?5, ?5
             )
             ON CONFLICT(session_id) DO UPDATE SET
                user_agent = excluded.user_agent,
                client_ip = excluded.client_ip,
                environment = excluded.environment,
                last_seen = excluded.last_seen,
                updated_at = excluded.updated_at,
                request_count = user_sessions.request_count + 1,
                total_tokens = user_sessions.total_tokens + excluded.total_tokens,
                metadata = COALESCE(excluded.metadata, user_sessions.metadata),
                models_used = (
                    SELECT json_group_array(value) FROM (
                        SELECT value FROM json_each(user_sessions.models_used)
                        UNION
                        SELECT value FROM json_each(?6)
                    )
                ),
                vendors_used = (
                    SELECT json_group_array(value) FROM (
                        SELECT value FROM json_each(user_sessions.vendors_used)
                        UNION
                        SELECT value FROM json_each(?7)
                    )
                )",
        )
        .bind(&session.session_id)
        .bind(&session.user_agent)
        .bind(&session.client_ip)
        .bind(&session.environment)
        .bind(now)
        .bind(&models)
        .bind(&vendors)
        .bind(session.total_tokens)
        .bind(metadata)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    pub async fn find(&self, session_id: &str) -> StoreResult<Option<UserSessionRecord>> {
        let row = sqlx::query("SELECT * FROM user_sessions WHERE session_id = ?")
            .bind(session_id)
            .fetch_optional(self.pool)
            .await?;

        row.as_ref().map(decode_session).transpose()
    }

    /// Sessions seen at or after `since`, most recently active first
    pub async fn active_since(&self, since: DateTime<Utc>, limit: i64) -> StoreResult<Vec<UserSessionRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM user_sessions WHERE last_seen >= ? ORDER BY last_seen DESC LIMIT ?",
        )
        .bind(since.timestamp_millis())
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        rows.iter().map(decode_session).collect()
    }
}

fn decode_session(row: &SqliteRow) -> StoreResult<UserSessionRecord> {
    let models_used: String = row.try_get("models_used")?;
    let vendors_used: String = row.try_get("vendors_used")?;
    let metadata: Option<String> = row.try_get("metadata")?;

    Ok(UserSessionRecord {
        session_id: row.try_get("session_id")?,
        user_agent: row.try_get("user_agent")?,
        client_ip: row.try_get("client_ip")?,
        environment: row.try_get("environment")?,
        first_seen: from_millis(row.try_get("first_seen")?),
        last_seen: from_millis(row.try_get("last_seen")?),
        request_count: row.try_get("request_count")?,
        models_used: serde_json::from_str(&models_used)?,
        vendors_used: serde_json::from_str(&vendors_used)?,
        total_tokens: row.try_get("total_tokens")?,
        metadata: match metadata {
            Some(text) => serde_json::from_str(&text)?,
            None => Default::default(),
        },
        created_at: from_millis(row.try_get("created_at")?),
        updated_at: from_millis(row.try_get("updated_at")?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DatabaseConfig, StoreConnection};
    use chrono::Duration;
    use std::sync::Arc;

    async fn memory_store() -> StoreConnection {
        StoreConnection::connect(DatabaseConfig::new("sqlite::memory:", "test", "router"))
            .await
            .unwrap()
    }

    fn sorted(mut items: Vec<String>) -> Vec<String> {
        items.sort();
        items
    }

    fn log(request_id: &str, vendor: &str, at: DateTime<Utc>) -> RequestLogRecord {
        let mut record = RequestLogRecord::new(request_id, "POST", "/v1/chat/completions");
        record.selected_vendor = vendor.to_string();
        record.status_code = 200;
        record.environment = "test".to_string();
        record.timestamp = at;
        record
    }

    #[tokio::test]
    async fn test_request_log_insert_and_lookup() {
        let store = memory_store().await;
        let repo = store.request_logs();

        let mut record = log("req-1", "openai", Utc::now());
        record.request_body = r#"{"model":"gpt-4o"}"#.to_string();
        record.prompt_tokens = 12;
        repo.insert(record).await.unwrap();

        let found = repo.find_by_request_id("req-1").await.unwrap().unwrap();
        assert_eq!(found.selected_vendor, "openai");
        assert_eq!(found.prompt_tokens, 12);
        assert_eq!(found.request_body, r#"{"model":"gpt-4o"}"#);

        assert!(repo.find_by_request_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_request_log_listing() {
        let store = memory_store().await;
        let repo = store.request_logs();
        let base = Utc::now();

        repo.insert(log("a", "openai", base - Duration::seconds(30))).await.unwrap();
        repo.insert(log("b", "gemini", base - Duration::seconds(20))).await.unwrap();
        repo.insert(log("c", "openai", base - Duration::seconds(10))).await.unwrap();

        let recent: Vec<_> = repo.recent(2, 0).await.unwrap().into_iter().map(|r| r.request_id).collect();
        assert_eq!(recent, vec!["c", "b"]);

        let page: Vec<_> = repo.recent(2, 2).await.unwrap().into_iter().map(|r| r.request_id).collect();
        assert_eq!(page, vec!["a"]);

        let openai: Vec<_> = repo.by_vendor("openai", 10).await.unwrap().into_iter().map(|r| r.request_id).collect();
        assert_eq!(openai, vec!["c", "a"]);

        let window = repo
            .by_time_range(base - Duration::seconds(25), base - Duration::seconds(5), 10)
            .await
            .unwrap();
        assert_eq!(window.len(), 2);
    }

    #[tokio::test]
    async fn test_vendor_metrics_by_period() {
        let store = memory_store().await;
        let repo = store.vendor_metrics();
        let start = Utc::now() - Duration::hours(3);

        for hour in 0..3 {
            let now = Utc::now();
            repo.insert(VendorMetricsRecord {
                vendor: "openai".to_string(),
                model: "gpt-4o".to_string(),
                environment: "test".to_string(),
                period_start: start + Duration::hours(hour),
                period_end: start + Duration::hours(hour + 1),
                period_type: "hour".to_string(),
                total_requests: 10 + hour,
                successful_requests: 10,
                failed_requests: hour,
                avg_duration_ms: 120.0,
                min_duration_ms: 50,
                max_duration_ms: 300,
                median_duration_ms: 110.0,
                error_rate: 0.0,
                error_breakdown: Default::default(),
                status_code_counts: [("200".to_string(), 10)].into_iter().collect(),
                total_prompt_tokens: 0,
                total_completion_tokens: 0,
                total_tokens: 0,
                avg_tokens_per_request: 0.0,
                streaming_requests: 0,
                avg_stream_chunks: 0.0,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        }

        let metrics = repo
            .by_period("openai", "gpt-4o", "hour", start, start + Duration::hours(2))
            .await
            .unwrap();
        assert_eq!(metrics.len(), 2);
        assert!(metrics[0].period_start > metrics[1].period_start);

        let none = repo
            .by_period("openai", "gpt-4o", "day", start, start + Duration::hours(3))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_latest_system_health_per_environment() {
        let store = memory_store().await;
        let repo = store.system_health();

        let mut old = SystemHealthRecord::new("test", "healthy", "healthy");
        old.timestamp = Utc::now() - Duration::minutes(5);
        repo.insert(old).await.unwrap();
        repo.insert(SystemHealthRecord::new("test", "degraded", "unhealthy")).await.unwrap();
        repo.insert(SystemHealthRecord::new("production", "healthy", "healthy")).await.unwrap();

        let latest = repo.latest("test").await.unwrap().unwrap();
        assert_eq!(latest.service_status, "degraded");
        assert_eq!(latest.database_status, "unhealthy");
        assert!(repo.latest("local").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_session_upsert_merges() {
        let store = memory_store().await;
        let repo = store.user_sessions();

        let mut first = UserSessionRecord::new("s-1", "ua", "203.0.113.7", "test");
        first.models_used = vec!["gpt-4o".to_string(), "gpt-4o".to_string()];
        first.vendors_used = vec!["openai".to_string()];
        first.total_tokens = 10;
        repo.upsert(&first).await.unwrap();

        let inserted = repo.find("s-1").await.unwrap().unwrap();
        assert_eq!(inserted.request_count, 1);
        assert_eq!(inserted.models_used, vec!["gpt-4o"]);
        assert_eq!(inserted.first_seen, inserted.last_seen);

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let mut second = UserSessionRecord::new("s-1", "ua", "203.0.113.7", "test");
        second.models_used = vec!["gemini-2.0-flash".to_string(), "gpt-4o".to_string()];
        second.vendors_used = vec!["gemini".to_string()];
        second.total_tokens = 5;
        repo.upsert(&second).await.unwrap();

        let merged = repo.find("s-1").await.unwrap().unwrap();
        assert_eq!(merged.request_count, 2);
        assert_eq!(merged.total_tokens, 15);
        assert_eq!(merged.first_seen, inserted.first_seen);
        assert_eq!(merged.created_at, inserted.created_at);
        assert!(merged.last_seen > inserted.last_seen);
        assert_eq!(sorted(merged.models_used), vec!["gemini-2.0-flash", "gpt-4o"]);
        assert_eq!(sorted(merged.vendors_used), vec!["gemini", "openai"]);
    }

    #[tokio::test]
    async fn test_concurrent_session_upserts_union_usage() {
        let dir = tempfile::tempdir().unwrap();
        let uri = format!("sqlite://{}", dir.path().display());
        let store = Arc::new(
            StoreConnection::connect(DatabaseConfig::new(uri, "test", "router"))
                .await
                .unwrap(),
        );

        let upsert = |model: &'static str, vendor: &'static str| {
            let store = store.clone();
            tokio::spawn(async move {
                let mut session = UserSessionRecord::new("shared", "ua", "198.51.100.2", "test");
                session.models_used = vec![model.to_string()];
                session.vendors_used = vec![vendor.to_string()];
                store.user_sessions().upsert(&session).await
            })
        };

        let a = upsert("gpt-4o", "openai");
        let b = upsert("gemini-2.0-flash", "gemini");
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let session = store.user_sessions().find("shared").await.unwrap().unwrap();
        assert_eq!(session.request_count, 2);
        assert_eq!(sorted(session.models_used), vec!["gemini-2.0-flash", "gpt-4o"]);
        assert_eq!(sorted(session.vendors_used), vec!["gemini", "openai"]);
    }

    #[tokio::test]
    async fn test_active_sessions_since() {
        let store = memory_store().await;
        let repo = store.user_sessions();
        let before = Utc::now() - Duration::seconds(1);

        repo.upsert(&UserSessionRecord::new("s-1", "ua", "ip", "test")).await.unwrap();
        repo.upsert(&UserSessionRecord::new("s-2", "ua", "ip", "test")).await.unwrap();

        assert_eq!(repo.active_since(before, 10).await.unwrap().len(), 2);
        assert_eq!(repo.active_since(before, 1).await.unwrap().len(), 1);
        let future = Utc::now() + Duration::minutes(1);
        assert!(repo.active_since(future, 10).await.unwrap().is_empty());
    }
}
