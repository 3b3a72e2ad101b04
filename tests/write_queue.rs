#![cfg(not(loom))]
//! Write queue behaviour observed through its public API.

use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use bytes::Bytes;
use rstest::rstest;
use tokio::{io::AsyncWrite, time::timeout};
use wireline::{
    CloseReason,
    connection::ConnectionId,
    write_queue::{Admission, FailurePolicy, WriteQueue, WriteQueueConfig, WriteQueueError, WriteRequest},
};
use wireline_testing::{Completion, CompletionRecorder};

/// Accepts a fixed number of writes, then fails every call.
struct BrokenPipe {
    accepted: Vec<u8>,
    remaining: usize,
}

impl BrokenPipe {
    fn after(writes: usize) -> Self {
        Self {
            accepted: Vec::new(),
            remaining: writes,
        }
    }
}

impl AsyncWrite for BrokenPipe {
    fn poll_write(mut self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        if self.remaining == 0 {
            return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
        }
        self.remaining -= 1;
        self.accepted.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> { Poll::Ready(Ok(())) }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> { Poll::Ready(Ok(())) }
}

fn queue(config: WriteQueueConfig) -> WriteQueue { WriteQueue::new(ConnectionId::new(1), config) }

#[rstest]
#[tokio::test]
async fn flush_settles_each_record_in_order() {
    let queue = queue(WriteQueueConfig::default());
    let recorder = CompletionRecorder::new();
    for (tag, payload) in [("a", "one"), ("b", "two"), ("c", "three")] {
        queue.enqueue(recorder.request(tag, payload)).expect("enqueue");
    }

    let mut out = Vec::new();
    let flushed = queue.flush_to(&mut out).await.expect("flush");

    assert_eq!(out, b"onetwothree");
    assert_eq!(flushed.records, 3);
    assert_eq!(flushed.bytes, 11);
    assert_eq!(recorder.tags(), ["a", "b", "c"]);
    assert_eq!(
        recorder.completions()[2],
        Completion {
            tag: "c".into(),
            bytes_written: Some(5),
            cancelled: false,
        }
    );
}

#[rstest]
#[case::cancel_remaining(FailurePolicy::CancelRemaining, 2, true)]
#[case::isolate(FailurePolicy::Isolate, 0, false)]
#[tokio::test]
async fn failed_transmission_follows_policy(
    #[case] policy: FailurePolicy,
    #[case] cancelled: usize,
    #[case] closed: bool,
) {
    let queue = queue(WriteQueueConfig::default().failure_policy(policy));
    let recorder = CompletionRecorder::new();
    for tag in ["ok", "broken", "later", "last"] {
        queue.enqueue(recorder.request(tag, Bytes::from_static(b"x"))).expect("enqueue");
    }

    let mut writer = BrokenPipe::after(1);
    let flushed = queue.flush_to(&mut writer).await.expect("flush");

    assert_eq!(flushed.records, 1);
    assert_eq!(flushed.failure, Some(io::ErrorKind::BrokenPipe));
    assert_eq!(writer.accepted, b"x");
    assert_eq!(recorder.cancelled(), cancelled);
    assert_eq!(queue.is_closed(), closed);
    assert_eq!(recorder.tags()[..2], ["ok".to_owned(), "broken".to_owned()]);
}

#[rstest]
#[tokio::test]
async fn producers_wait_for_backlog_to_drain() {
    let queue = std::sync::Arc::new(queue(WriteQueueConfig::default().max_pending_bytes(Some(4))));
    let recorder = CompletionRecorder::new();

    let first = queue.enqueue(recorder.request("a", "abc")).expect("enqueue");
    assert_eq!(first.admission, Admission::Accepted);
    let second = queue.enqueue(recorder.request("b", "def")).expect("enqueue");
    assert_eq!(
        second.admission,
        Admission::Overloaded {
            pending_bytes: 6,
            pending_records: 2,
        }
    );

    let waiter = {
        let queue = std::sync::Arc::clone(&queue);
        tokio::spawn(async move { queue.writable().await })
    };
    tokio::task::yield_now().await;
    assert!(!waiter.is_finished());

    let mut out = Vec::new();
    queue.flush_to(&mut out).await.expect("flush");
    timeout(Duration::from_secs(1), waiter)
        .await
        .expect("producer woke")
        .expect("join")
        .expect("writable");
    assert_eq!(out, b"abcdef");
}

#[rstest]
#[tokio::test]
async fn pending_writes_observe_cancellation() {
    let queue = queue(WriteQueueConfig::default());
    let enqueued = queue.enqueue(WriteRequest::new(Bytes::from_static(b"late"))).expect("enqueue");

    assert_eq!(queue.cancel_all(CloseReason::Shutdown), 1);
    let outcome = enqueued.pending.await;
    assert!(outcome.expect_err("cancelled").is_cancelled());
    assert!(enqueued.record.is_recycled());
    assert!(matches!(
        queue.enqueue(WriteRequest::new("again")),
        Err(WriteQueueError::Closed {
            reason: CloseReason::Shutdown,
            ..
        })
    ));
}
