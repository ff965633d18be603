// Violation sink behavior: the queue is bounded and non-blocking, the writer
// drains into the store, and failures are counted rather than vanishing.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use uuid::Uuid;

use smartattend_api::audit::{
    run_writer, AuditError, AuditSink, MemoryViolationStore, ViolationOutcome, ViolationRecord,
    ViolationStore,
};

fn violation(platform: Uuid) -> ViolationRecord {
    ViolationRecord {
        occurred_at: Utc::now(),
        platform_id: platform,
        attempted_platform_id: Some(Uuid::new_v4()),
        attempted_kind: Some("students".to_string()),
        attempted_id: None,
        principal: Uuid::new_v4(),
        outcome: ViolationOutcome::Denied,
    }
}

struct FailingStore;

#[async_trait::async_trait]
impl ViolationStore for FailingStore {
    async fn append(&self, _violation: &ViolationRecord) -> Result<(), AuditError> {
        Err(AuditError::Store("backing store offline".to_string()))
    }
}

#[tokio::test]
async fn writer_drains_queue_into_store() -> Result<()> {
    let (sink, rx) = AuditSink::channel(16);
    let store = Arc::new(MemoryViolationStore::new());
    let dyn_store: Arc<dyn ViolationStore> = store.clone();
    let stats = sink.stats_handle();

    let writer = tokio::spawn(run_writer(rx, dyn_store, stats.clone()));

    let platform = Uuid::new_v4();
    for _ in 0..3 {
        sink.record(violation(platform));
    }
    assert_eq!(sink.stats().enqueued, 3);

    // Closing the sender lets the writer drain and exit
    drop(sink);
    writer.await?;

    let records = store.records();
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r.platform_id == platform));
    assert_eq!(stats.snapshot().written, 3);
    assert_eq!(stats.snapshot().write_failures, 0);
    Ok(())
}

#[tokio::test]
async fn full_queue_drops_are_counted_not_blocked() {
    // No writer attached, depth 1: the second record cannot be enqueued
    let (sink, _rx) = AuditSink::channel(1);
    let platform = Uuid::new_v4();

    sink.record(violation(platform));
    sink.record(violation(platform));

    let stats = sink.stats();
    assert_eq!(stats.enqueued, 1);
    assert_eq!(stats.dropped, 1);
}

#[tokio::test]
async fn store_failures_escalate_into_counters() -> Result<()> {
    let (sink, rx) = AuditSink::channel(16);
    let stats = sink.stats_handle();

    let writer = tokio::spawn(run_writer(rx, Arc::new(FailingStore), stats.clone()));

    let platform = Uuid::new_v4();
    sink.record(violation(platform));
    sink.record(violation(platform));

    drop(sink);
    writer.await?;

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.write_failures, 2);
    assert_eq!(snapshot.written, 0);
    Ok(())
}

#[tokio::test]
async fn records_after_writer_exit_are_counted_as_dropped() {
    let (sink, rx) = AuditSink::channel(4);
    drop(rx);

    sink.record(violation(Uuid::new_v4()));
    assert_eq!(sink.stats().dropped, 1);
    assert_eq!(sink.stats().enqueued, 0);
}
