#![cfg(all(feature = "advanced-tests", loom))]
//! Concurrency tests for write queues and the recycling pool using loom.
//!
//! These tests race the I/O side of a `WriteQueue` against cancellation
//! from another thread. `loom` explores the interleavings to ensure every
//! record settles exactly once, in submission order, and that pooled
//! objects come back reset.

use loom::{
    model,
    sync::{
        Arc,
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
};
use wireline::{
    CloseReason,
    connection::ConnectionId,
    recycle::{Lifecycle, PoolConfig, Recyclable, RecycleError, RecyclePool, ReleaseSite},
    write_queue::{Settlement, WriteQueue, WriteQueueConfig, WriteRequest},
};

fn counted(calls: &Arc<AtomicUsize>, payload: &'static str) -> WriteRequest {
    let calls = Arc::clone(calls);
    WriteRequest::new(payload).on_complete(move |_| {
        calls.fetch_add(1, Ordering::SeqCst);
    })
}

fn ordered(order: &Arc<Mutex<Vec<&'static str>>>, payload: &'static str) -> WriteRequest {
    let order = Arc::clone(order);
    WriteRequest::new(payload).on_complete(move |_| {
        order.lock().expect("order lock").push(payload);
    })
}

#[test]
fn completion_racing_cancellation_settles_once() {
    model(|| {
        let queue = Arc::new(WriteQueue::new(ConnectionId::new(1), WriteQueueConfig::default()));
        let order = Arc::new(Mutex::new(Vec::new()));
        queue.enqueue(ordered(&order, "a")).expect("enqueue a");
        queue.enqueue(ordered(&order, "b")).expect("enqueue b");
        let record = queue.drain_next().expect("drain a");

        let io = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.complete(&record, Ok(1)).expect("in order"))
        };
        let closer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.cancel_all(CloseReason::Remote))
        };

        let settled = io.join().expect("io thread panicked");
        let cancelled = closer.join().expect("closer thread panicked");

        assert_eq!(*order.lock().expect("order lock"), ["a", "b"], "callbacks run once, in order");
        match settled {
            Settlement::Settled => assert_eq!(cancelled, 1),
            Settlement::AlreadySettled => assert_eq!(cancelled, 2),
        }
        let stats = queue.stats();
        assert_eq!(stats.completed + stats.cancelled, 2);
        assert_eq!(stats.pending_bytes, 0);
    });
}

#[test]
fn concurrent_cancellations_settle_once() {
    model(|| {
        let queue = Arc::new(WriteQueue::new(ConnectionId::new(2), WriteQueueConfig::default()));
        let calls = Arc::new(AtomicUsize::new(0));
        queue.enqueue(counted(&calls, "x")).expect("enqueue");

        let handles: Vec<_> = [CloseReason::Local, CloseReason::Shutdown]
            .into_iter()
            .map(|reason| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || queue.cancel_all(reason))
            })
            .collect();
        let total: usize = handles
            .into_iter()
            .map(|h| h.join().expect("cancel thread panicked"))
            .sum();

        assert_eq!(total, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(queue.is_closed());
    });
}

#[derive(Default)]
struct Buffer {
    lifecycle: Lifecycle,
    owner: Option<usize>,
}

impl Recyclable for Buffer {
    fn activate(&mut self, track: bool) -> u64 { self.lifecycle.activate(track) }

    fn recycle(&mut self, site: ReleaseSite) -> Result<(), RecycleError> {
        self.lifecycle.retire(site)?;
        self.owner = None;
        Ok(())
    }
}

#[test]
fn pooled_objects_are_reset_between_owners() {
    model(|| {
        let pool = Arc::new(RecyclePool::new(PoolConfig::default(), Buffer::default));
        let (buffer, _) = pool.acquire();
        pool.release(buffer).expect("release");

        let handles: Vec<_> = (0..2)
            .map(|owner| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    let (mut buffer, generation) = pool.acquire();
                    assert_eq!(buffer.owner, None, "acquired object was not reset");
                    assert!(buffer.lifecycle.check(generation).is_ok());
                    buffer.owner = Some(owner);
                    pool.release(buffer).expect("release");
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("pool thread panicked");
        }

        let stats = pool.stats();
        assert_eq!(stats.released, 3);
        assert_eq!(stats.allocated + stats.reused, 3);
        assert!(stats.reused >= 1);
    });
}
