use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Audit store error: {0}")]
    Store(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// What happened to the offending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationOutcome {
    /// The request was rejected outright.
    Denied,
    /// A creation payload carried a foreign owner value; the request was
    /// allowed and the value overwritten at insert time. Recorded anyway.
    Stamped,
}

impl ViolationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationOutcome::Denied => "denied",
            ViolationOutcome::Stamped => "stamped",
        }
    }
}

/// Append-only record of an attempted cross-tenant access.
#[derive(Debug, Clone, Serialize)]
pub struct ViolationRecord {
    pub occurred_at: DateTime<Utc>,
    /// Tenant the caller authenticated as.
    pub platform_id: Uuid,
    /// Tenant value the caller tried to reach.
    pub attempted_platform_id: Option<Uuid>,
    pub attempted_kind: Option<String>,
    pub attempted_id: Option<String>,
    /// Authenticated principal (user id).
    pub principal: Uuid,
    pub outcome: ViolationOutcome,
}

/// Durable backend for violation records.
#[async_trait]
pub trait ViolationStore: Send + Sync {
    async fn append(&self, violation: &ViolationRecord) -> Result<(), AuditError>;
}

/// Production store: appends to the tenant_violations table.
pub struct PgViolationStore {
    pool: PgPool,
}

impl PgViolationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ViolationStore for PgViolationStore {
    async fn append(&self, violation: &ViolationRecord) -> Result<(), AuditError> {
        sqlx::query(
            "INSERT INTO tenant_violations \
             (occurred_at, platform_id, attempted_platform_id, attempted_kind, attempted_id, principal, outcome) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(violation.occurred_at)
        .bind(violation.platform_id)
        .bind(violation.attempted_platform_id)
        .bind(&violation.attempted_kind)
        .bind(&violation.attempted_id)
        .bind(violation.principal)
        .bind(violation.outcome.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// In-memory store for tests and local development.
#[derive(Default)]
pub struct MemoryViolationStore {
    records: std::sync::Mutex<Vec<ViolationRecord>>,
}

impl MemoryViolationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ViolationRecord> {
        self.records.lock().expect("store lock").clone()
    }
}

#[async_trait]
impl ViolationStore for MemoryViolationStore {
    async fn append(&self, violation: &ViolationRecord) -> Result<(), AuditError> {
        self.records.lock().expect("store lock").push(violation.clone());
        Ok(())
    }
}

/// Operational counters; every enqueue, drop, write and write failure is
/// accounted for so nothing disappears silently.
#[derive(Default)]
pub struct AuditStats {
    enqueued: AtomicU64,
    dropped: AtomicU64,
    written: AtomicU64,
    write_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct AuditStatsSnapshot {
    pub enqueued: u64,
    pub dropped: u64,
    pub written: u64,
    pub write_failures: u64,
}

impl AuditStats {
    pub fn snapshot(&self) -> AuditStatsSnapshot {
        AuditStatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
        }
    }
}

/// Bounded, non-blocking entry point for violation records.
///
/// `record` costs one `try_send`; persistence happens on a worker task. A
/// full queue or a failing store is logged at error level and counted in
/// [`AuditStats`], which health reporting exposes.
#[derive(Clone)]
pub struct AuditSink {
    tx: mpsc::Sender<ViolationRecord>,
    stats: Arc<AuditStats>,
}

impl AuditSink {
    /// Channel half only; callers drive the receiver themselves. Used by
    /// tests and by [`AuditSink::spawn`].
    pub fn channel(queue_depth: usize) -> (Self, mpsc::Receiver<ViolationRecord>) {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        (Self { tx, stats: Arc::new(AuditStats::default()) }, rx)
    }

    /// Sink plus a spawned writer task draining into `store`.
    pub fn spawn(store: Arc<dyn ViolationStore>, queue_depth: usize) -> (Self, JoinHandle<()>) {
        let (sink, rx) = Self::channel(queue_depth);
        let handle = tokio::spawn(run_writer(rx, store, sink.stats.clone()));
        (sink, handle)
    }

    pub fn record(&self, violation: ViolationRecord) {
        match self.tx.try_send(violation) {
            Ok(()) => {
                self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Full(v)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    platform_id = %v.platform_id,
                    principal = %v.principal,
                    "audit queue full, violation record dropped"
                );
            }
            Err(mpsc::error::TrySendError::Closed(v)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    platform_id = %v.platform_id,
                    principal = %v.principal,
                    "audit writer gone, violation record dropped"
                );
            }
        }
    }

    pub fn stats(&self) -> AuditStatsSnapshot {
        self.stats.snapshot()
    }

    /// Shared counter handle for a caller-driven writer (see [`run_writer`]).
    pub fn stats_handle(&self) -> Arc<AuditStats> {
        self.stats.clone()
    }
}

pub async fn run_writer(
    mut rx: mpsc::Receiver<ViolationRecord>,
    store: Arc<dyn ViolationStore>,
    stats: Arc<AuditStats>,
) {
    while let Some(violation) = rx.recv().await {
        match store.append(&violation).await {
            Ok(()) => {
                stats.written.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                stats.write_failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    error = %e,
                    platform_id = %violation.platform_id,
                    principal = %violation.principal,
                    outcome = violation.outcome.as_str(),
                    "failed to persist violation record"
                );
            }
        }
    }
}
