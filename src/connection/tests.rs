//! Tests for connections and the connection registry.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use rstest::{fixture, rstest};

use super::*;
use crate::{attributes::Attribute, write_queue::WriteError};

fn connection(id: u64) -> Connection {
    Connection::new(
        ConnectionId::new(id),
        Arc::new(Pipeline::default()),
        WriteQueueConfig::default(),
    )
}

#[fixture]
fn registry() -> ConnectionRegistry { ConnectionRegistry::new() }

#[rstest]
#[tokio::test]
async fn close_cancels_writes_and_clears_attributes() {
    let conn = connection(1);
    let attr: Attribute<u32> = Attribute::new("tests.connection.counter");
    conn.attributes().set(&attr, 5);
    let enqueued = conn.write("pending").expect("enqueue");

    assert!(conn.close(CloseReason::Remote));
    assert!(conn.is_closed());
    assert!(conn.attributes().get(&attr).is_none());
    assert!(matches!(
        enqueued.pending.await,
        Err(WriteError::Cancelled(CloseReason::Remote))
    ));
    assert!(conn.write("late").is_err());
}

#[rstest]
fn close_is_idempotent() {
    let conn = connection(2);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    conn.write_queue()
        .enqueue(WriteRequest::new("x").on_complete(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
        .expect("enqueue");

    assert!(conn.close(CloseReason::Local));
    assert!(!conn.close(CloseReason::Shutdown));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(conn.write_queue().close_reason(), Some(CloseReason::Local));
}

#[rstest]
fn first_close_request_wins() {
    let conn = connection(3);
    assert!(conn.close_requested().is_none());
    conn.request_close(CloseReason::IdleTimeout);
    conn.request_close(CloseReason::Remote);
    assert_eq!(conn.close_requested(), Some(CloseReason::IdleTimeout));
}

#[rstest]
fn connection_id_display() {
    assert_eq!(ConnectionId::from(42).to_string(), "ConnectionId(42)");
    assert_eq!(ConnectionId::new(42).as_u64(), 42);
}

#[rstest]
fn registry_returns_live_connections(registry: ConnectionRegistry) {
    let conn = Arc::new(connection(10));
    registry.insert(&conn);
    let found = registry.get(&ConnectionId::new(10)).expect("live connection");
    assert!(Arc::ptr_eq(&found, &conn));
}

#[rstest]
fn registry_prunes_dropped_connections(registry: ConnectionRegistry) {
    let kept = Arc::new(connection(11));
    let dropped = Arc::new(connection(12));
    registry.insert(&kept);
    registry.insert(&dropped);
    drop(dropped);

    assert!(registry.get(&ConnectionId::new(12)).is_none());
    assert_eq!(registry.active_ids(), vec![ConnectionId::new(11)]);
    assert_eq!(registry.len(), 1);
}

#[rstest]
fn close_all_closes_each_connection_once(registry: ConnectionRegistry) {
    let a = Arc::new(connection(20));
    let b = Arc::new(connection(21));
    registry.insert(&a);
    registry.insert(&b);
    b.close(CloseReason::Remote);

    assert_eq!(registry.close_all(CloseReason::Shutdown), 1);
    assert!(a.is_closed());
    assert_eq!(a.write_queue().close_reason(), Some(CloseReason::Shutdown));
    assert_eq!(b.write_queue().close_reason(), Some(CloseReason::Remote));
}
