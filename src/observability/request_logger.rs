use crate::store::{
    with_timeout, ConnectionManager, RequestLogRecord, StoreConnection, StoreError,
    SystemHealthRecord, UserSessionRecord, VendorMetricsRecord, WRITE_TIMEOUT,
};
use futures::FutureExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Queue depth and worker count for background persistence
#[derive(Debug, Clone, Copy)]
pub struct PersistenceSettings {
    pub queue_depth: usize,
    pub workers: usize,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            queue_depth: 1024,
            workers: 4,
        }
    }
}

/// A unit of persistence work
#[derive(Debug, Clone)]
pub enum PersistJob {
    RequestLog(RequestLogRecord),
    VendorMetrics(VendorMetricsRecord),
    SystemHealth(SystemHealthRecord),
    UserSession(UserSessionRecord),
}

impl PersistJob {
    fn kind(&self) -> &'static str {
        match self {
            Self::RequestLog(_) => "request_log",
            Self::VendorMetrics(_) => "vendor_metrics",
            Self::SystemHealth(_) => "system_health",
            Self::UserSession(_) => "user_session",
        }
    }
}

struct Inner {
    /// `None` once the logger has been shut down
    tx: Mutex<Option<mpsc::Sender<PersistJob>>>,
    store: Arc<StoreConnection>,
    dropped: AtomicU64,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// Fire-and-forget persistence gateway
///
/// Submissions go to a bounded queue drained by a fixed set of workers; each
/// write runs under its own timeout and failures are logged, never returned.
/// When the queue is full the new job is dropped and counted.
///
/// A disabled logger (no store configured, or the store was unreachable at
/// startup) turns every call into a no-op.
#[derive(Clone)]
pub struct RequestLogger {
    inner: Option<Arc<Inner>>,
}

impl RequestLogger {
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// Start the workers against an open store
    pub fn spawn(store: Arc<StoreConnection>, settings: PersistenceSettings) -> Self {
        let (tx, rx) = mpsc::channel::<PersistJob>(settings.queue_depth.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let workers = (0..settings.workers.max(1))
            .map(|worker| {
                let rx = rx.clone();
                let store = store.clone();
                tokio::spawn(async move {
                    let result = std::panic::AssertUnwindSafe(worker_loop(worker, rx, store))
                        .catch_unwind()
                        .await;
                    if let Err(e) = result {
                        tracing::error!(worker, panic = ?e, "Persistence worker panicked");
                    }
                })
            })
            .collect();

        tracing::info!(
            queue_depth = settings.queue_depth,
            workers = settings.workers,
            "Request persistence enabled"
        );

        Self {
            inner: Some(Arc::new(Inner {
                tx: Mutex::new(Some(tx)),
                store,
                dropped: AtomicU64::new(0),
                workers: Mutex::new(workers),
            })),
        }
    }

    /// Connect through `manager` once; any failure leaves persistence disabled
    pub async fn from_manager(manager: &ConnectionManager, settings: PersistenceSettings) -> Self {
        if manager.config().is_none() {
            tracing::info!("No store URI configured, request persistence disabled");
            return Self::disabled();
        }

        match manager.get_connection().await {
            Ok(store) => Self::spawn(store, settings),
            Err(e) => {
                tracing::warn!(error = %e, "Store unavailable, request persistence disabled");
                Self::disabled()
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    pub fn store(&self) -> Option<&Arc<StoreConnection>> {
        self.inner.as_ref().map(|inner| &inner.store)
    }

    /// Jobs discarded because the queue was full
    pub fn dropped_jobs(&self) -> u64 {
        self.inner
            .as_ref()
            .map_or(0, |inner| inner.dropped.load(Ordering::Relaxed))
    }

    pub fn log_request(&self, record: RequestLogRecord) {
        self.submit(|| PersistJob::RequestLog(record));
    }

    pub fn log_vendor_metrics(&self, record: VendorMetricsRecord) {
        self.submit(|| PersistJob::VendorMetrics(record));
    }

    pub fn log_system_health(&self, record: SystemHealthRecord) {
        self.submit(|| PersistJob::SystemHealth(record));
    }

    pub fn log_user_session(&self, record: UserSessionRecord) {
        self.submit(|| PersistJob::UserSession(record));
    }

    /// Ping the store; `None` when persistence is disabled
    pub async fn health_check(&self) -> Option<Result<(), StoreError>> {
        match &self.inner {
            Some(inner) => Some(inner.store.health_check().await),
            None => None,
        }
    }

    /// Close the queue and wait up to `grace` for queued jobs to finish
    ///
    /// Closes the queue for every clone of this logger; later submissions
    /// are dropped.
    pub async fn shutdown(self, grace: Duration) {
        let Some(inner) = self.inner else {
            return;
        };

        drop(lock(&inner.tx).take());
        let workers = std::mem::take(&mut *lock(&inner.workers));
        if workers.is_empty() {
            tracing::debug!("Request logger already shut down");
            return;
        }

        if tokio::time::timeout(grace, futures::future::join_all(workers))
            .await
            .is_err()
        {
            tracing::warn!(grace_ms = grace.as_millis() as u64, "Persistence queue not drained before shutdown");
        } else {
            tracing::info!("Persistence queue drained");
        }
    }

    fn submit(&self, job: impl FnOnce() -> PersistJob) {
        let Some(inner) = &self.inner else {
            return;
        };

        let tx = lock(&inner.tx);
        let Some(tx) = tx.as_ref() else {
            tracing::debug!("Request logger shut down, dropping job");
            return;
        };

        match tx.try_send(job()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(job)) => {
                let dropped = inner.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(kind = job.kind(), dropped, "Persistence queue full, dropping job");
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                tracing::warn!(kind = job.kind(), "Persistence queue closed, dropping job");
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

async fn worker_loop(
    worker: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<PersistJob>>>,
    store: Arc<StoreConnection>,
) {
    loop {
        let job = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(job) = job else {
            break;
        };

        let kind = job.kind();
        if let Err(e) = execute(&store, job).await {
            tracing::warn!(worker, kind, error = %e, "Failed to persist record");
        }
    }
    tracing::debug!(worker, "Persistence worker stopped");
}

async fn execute(store: &StoreConnection, job: PersistJob) -> Result<(), StoreError> {
    match job {
        PersistJob::RequestLog(record) => {
            with_timeout("insert request log", WRITE_TIMEOUT, store.request_logs().insert(record)).await
        }
        PersistJob::VendorMetrics(record) => {
            with_timeout(
                "insert vendor metrics",
                WRITE_TIMEOUT,
                store.vendor_metrics().insert(record),
            )
            .await
        }
        PersistJob::SystemHealth(record) => {
            with_timeout(
                "insert system health",
                WRITE_TIMEOUT,
                store.system_health().insert(record),
            )
            .await
        }
        PersistJob::UserSession(record) => {
            with_timeout(
                "upsert user session",
                WRITE_TIMEOUT,
                store.user_sessions().upsert(&record),
            )
            .await
        }
    }
}

/// Stable session key for a client: name-based UUID over user agent and IP
pub fn generate_session_id(user_agent: &str, client_ip: &str) -> String {
    Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("{}|{}", user_agent, client_ip).as_bytes(),
    )
    .to_string()
}
