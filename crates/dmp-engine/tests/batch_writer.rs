// Batch writer retry policy against a scriptable destination

mod common;

use common::MockDestination;
use dmp_engine::events::{EventCategory, EventLevel, EventSink};
use dmp_engine::transform::{ColumnValue, TransformedRow};
use dmp_engine::writer::{Batch, BatchWriter, WriteError, WriterConfig};
use std::sync::Arc;
use std::time::Duration;

fn row(index: u32) -> TransformedRow {
    TransformedRow {
        source_index: index,
        values: vec![ColumnValue::Text(format!("row-{}", index))],
    }
}

fn batch(rows: u32) -> Batch {
    Batch {
        number: 1,
        rows: (0..rows).map(row).collect(),
    }
}

fn writer(
    destination: Arc<MockDestination>,
    max_retries: u32,
) -> (BatchWriter, Arc<EventSink>) {
    let events = Arc::new(EventSink::new());
    let writer = BatchWriter::new(
        destination,
        WriterConfig {
            max_retries,
            backoff_base: Duration::from_millis(1),
        },
        Arc::clone(&events),
    );
    (writer, events)
}

#[tokio::test]
async fn commit_succeeds_without_retry() {
    let destination = Arc::new(MockDestination::new());
    let (writer, events) = writer(Arc::clone(&destination), 3);

    let result = writer.commit(&batch(5)).await.unwrap();
    assert_eq!(result.rows, 5);
    assert_eq!(result.retries, 0);
    assert_eq!(destination.committed_rows().len(), 5);
    assert_eq!(events.count_level(EventLevel::Warning), 0);
}

#[tokio::test]
async fn failed_commit_leaves_no_partial_batch() {
    let destination = Arc::new(MockDestination::new());
    destination.fail_next(WriteError::Constraint {
        record: 3,
        message: "duplicate key".to_string(),
    });
    let (writer, _) = writer(Arc::clone(&destination), 3);

    let err = writer.commit(&batch(10)).await.unwrap_err();
    assert!(matches!(err, WriteError::Constraint { record: 3, .. }));
    assert!(destination.committed_rows().is_empty());
}

#[tokio::test]
async fn transient_failure_is_retried_once_and_logged() {
    let destination = Arc::new(MockDestination::new());
    destination.fail_next(WriteError::Transient("connection timeout".to_string()));
    let (writer, events) = writer(Arc::clone(&destination), 3);

    let result = writer.commit(&batch(4)).await.unwrap();
    assert_eq!(result.retries, 1);
    assert_eq!(destination.insert_calls(), 2);
    // No lost or duplicated rows.
    assert_eq!(destination.committed_rows().len(), 4);
    // Exactly one retry event.
    assert_eq!(events.count_level(EventLevel::Warning), 1);
    let retry_events: Vec<_> = events
        .events()
        .into_iter()
        .filter(|e| e.category == EventCategory::Database && e.message.contains("retry"))
        .collect();
    assert_eq!(retry_events.len(), 1);
}

#[tokio::test]
async fn retry_budget_is_bounded() {
    let destination = Arc::new(MockDestination::new());
    destination.fail_always(WriteError::Transient("connection reset".to_string()));
    let (writer, events) = writer(Arc::clone(&destination), 2);

    let err = writer.commit(&batch(3)).await.unwrap_err();
    assert!(err.is_transient());
    // Initial attempt plus two retries, then give up.
    assert_eq!(destination.insert_calls(), 3);
    assert_eq!(events.count_level(EventLevel::Warning), 2);
    assert!(destination.committed_rows().is_empty());
}

#[tokio::test]
async fn non_transient_failure_is_not_retried() {
    let destination = Arc::new(MockDestination::new());
    destination.fail_next(WriteError::Schema("column byear does not exist".to_string()));
    let (writer, events) = writer(Arc::clone(&destination), 3);

    let err = writer.commit(&batch(3)).await.unwrap_err();
    assert!(matches!(err, WriteError::Schema(_)));
    assert_eq!(destination.insert_calls(), 1);
    assert_eq!(events.count_level(EventLevel::Warning), 0);
}
