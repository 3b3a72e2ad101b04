#![cfg(all(not(loom), feature = "metrics"))]
//! Metrics emitted by queues, caches, pipelines and connections.
//!
//! Each test installs a thread-local `DebuggingRecorder` through
//! [`capture_metrics`] so runs do not interfere with each other.

use std::sync::Arc;

use rstest::rstest;
use wireline::{
    CloseReason,
    cache::{CacheConfig, CacheKey, EntryMetadata, ResourceCache},
    connection::{Connection, ConnectionId},
    metrics::{CACHE_EVENTS, CACHE_HEAP_BYTES, CONNECTIONS_ACTIVE, STAGE_ERRORS, WRITE_QUEUE_OVERLOADS, WRITES_SETTLED},
    pipeline::{IoEvent, Pipeline, Stage, StageAction, StageContext, StageError},
    write_queue::{WriteQueue, WriteQueueConfig, WriteRequest},
};
use wireline_testing::capture_metrics;

struct Refuse;

impl Stage for Refuse {
    fn name(&self) -> &str { "refuse" }

    fn handle(&self, _ctx: &mut StageContext<'_>) -> Result<StageAction, StageError> {
        Err(StageError::protocol("malformed request line"))
    }
}

#[rstest]
fn write_settlements_are_counted_by_outcome() {
    let captured = capture_metrics(|| {
        let queue = WriteQueue::new(ConnectionId::new(1), WriteQueueConfig::default());
        queue.enqueue(WriteRequest::new("sent")).expect("enqueue");
        queue.enqueue(WriteRequest::new("dropped")).expect("enqueue");
        let record = queue.drain_next().expect("record");
        queue.complete(&record, Ok(4)).expect("complete");
        queue.cancel_all(CloseReason::Local);
    });

    assert_eq!(captured.counter(WRITES_SETTLED, &[("outcome", "completed")]), 1);
    assert_eq!(captured.counter(WRITES_SETTLED, &[("outcome", "cancelled")]), 1);
    assert_eq!(captured.counter(WRITES_SETTLED, &[("outcome", "failed")]), 0);
}

#[rstest]
fn overload_is_counted_once_per_episode() {
    let captured = capture_metrics(|| {
        let queue = WriteQueue::new(
            ConnectionId::new(2),
            WriteQueueConfig::default().max_pending_records(Some(1)),
        );
        for payload in ["a", "b", "c"] {
            queue.enqueue(WriteRequest::new(payload)).expect("enqueue");
        }
    });

    assert_eq!(captured.counter(WRITE_QUEUE_OVERLOADS, &[]), 1);
}

#[rstest]
fn cache_events_and_heap_are_published() {
    let captured = capture_metrics(|| {
        let cache = ResourceCache::new("assets", CacheConfig::default().max_entry_size(4));
        cache.insert(CacheKey::path("/a"), "abc", EntryMetadata::default());
        cache.insert(CacheKey::path("/big"), "abcdef", EntryMetadata::default());
        let _ = cache.lookup(&CacheKey::path("/a"));
        let _ = cache.lookup(&CacheKey::path("/missing"));
    });

    for event in ["added", "error", "hit", "missed"] {
        assert_eq!(captured.counter(CACHE_EVENTS, &[("event", event)]), 1, "{event}");
    }
    assert_eq!(captured.gauge(CACHE_HEAP_BYTES, &[("cache", "assets")]), Some(3.0));
}

#[rstest]
fn failing_stage_is_counted_by_name() {
    let captured = capture_metrics(|| {
        let conn = Connection::new(
            ConnectionId::new(3),
            Arc::new(Pipeline::new(vec![Arc::new(Refuse) as Arc<dyn Stage>])),
            WriteQueueConfig::default(),
        );
        assert!(conn.fire(IoEvent::Read, None).is_err());
    });

    assert_eq!(captured.counter(STAGE_ERRORS, &[("stage", "refuse")]), 1);
}

#[rstest]
fn connection_gauge_rises_and_falls() {
    let captured = capture_metrics(|| {
        let conn = Connection::new(
            ConnectionId::new(4),
            Arc::new(Pipeline::default()),
            WriteQueueConfig::default(),
        );
        drop(conn);
    });

    assert_eq!(captured.gauge(CONNECTIONS_ACTIVE, &[]), Some(0.0));
}
