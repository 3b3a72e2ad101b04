//! Per-connection ordered queue of pending writes.

use std::{collections::VecDeque, panic::AssertUnwindSafe, pin::pin};

use tokio::sync::{Notify, oneshot};
use tracing::{debug, error, warn};

use super::{
    Interception,
    PendingWrite,
    WriteError,
    WriteOutcome,
    WriteQueueConfig,
    WriteQueueError,
    WriteReceipt,
    WriteRecord,
    WriteRequest,
    config::FailurePolicy,
    record::RecordSlot,
};
use crate::{
    connection::{CloseReason, ConnectionId},
    metrics::{self, WriteSettlement},
    panic::format_panic,
    recycle::RecyclePool,
    sync::{AtomicU64, Mutex, Ordering, lock},
};

/// Whether the queue can comfortably take more data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// The record was queued within the configured limits.
    Accepted,
    /// The record was queued but outstanding data now exceeds a limit.
    /// Producers should pause until [`WriteQueue::writable`] resolves.
    Overloaded {
        /// Bytes queued or in flight, including this record.
        pending_bytes: usize,
        /// Records queued or in flight, including this record.
        pending_records: usize,
    },
}

impl Admission {
    /// Whether the caller should apply backpressure.
    #[must_use]
    pub fn is_overloaded(self) -> bool { matches!(self, Self::Overloaded { .. }) }
}

/// Result of [`WriteQueue::enqueue`].
#[derive(Debug)]
pub struct Enqueued {
    /// Handle to the queued record.
    pub record: WriteRecord,
    /// Future resolving once the record settles.
    pub pending: PendingWrite,
    /// Backpressure advice.
    pub admission: Admission,
}

/// What [`WriteQueue::complete`] did with the record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Settlement {
    /// The record settled with the supplied result.
    Settled,
    /// A concurrent cancellation settled the record first.
    AlreadySettled,
}

/// Counters describing a queue's activity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WriteQueueStats {
    /// Records waiting to be drained.
    pub queued: usize,
    /// Records drained but not yet completed.
    pub in_flight: usize,
    /// Bytes queued or in flight.
    pub pending_bytes: usize,
    /// Records that settled successfully.
    pub completed: u64,
    /// Records that settled with a transport or interceptor failure.
    pub failed: u64,
    /// Records that were cancelled.
    pub cancelled: u64,
}

struct Entry {
    record: WriteRecord,
    bytes: usize,
    preset: Option<WriteOutcome>,
}

#[derive(Default)]
struct QueueState {
    queued: VecDeque<Entry>,
    in_flight: VecDeque<Entry>,
    /// Records whose outcome is decided, waiting for their callbacks in
    /// submission order.
    ready: VecDeque<(WriteRecord, WriteOutcome)>,
    /// Whether some thread is currently running callbacks from `ready`.
    settling: bool,
    pending_bytes: usize,
    overloaded: bool,
    closed: Option<CloseReason>,
}

impl QueueState {
    fn pending_records(&self) -> usize { self.queued.len() + self.in_flight.len() }

    fn release_bytes(&mut self, bytes: usize) { self.pending_bytes = self.pending_bytes.saturating_sub(bytes); }

    /// Move leading in-flight records whose outcome an interceptor already
    /// decided onto the ready list.
    fn collect_presets(&mut self) {
        while self.in_flight.front().is_some_and(|e| e.preset.is_some()) {
            let Some(Entry {
                record,
                bytes,
                preset: Some(outcome),
            }) = self.in_flight.pop_front()
            else {
                break;
            };
            self.release_bytes(bytes);
            self.ready.push_back((record, outcome));
        }
    }

    /// Close the queue and schedule every outstanding record for
    /// cancellation behind those already decided. Returns the number of
    /// records cancelled.
    fn close(&mut self, reason: CloseReason) -> usize {
        if self.closed.is_none() {
            self.closed = Some(reason);
        }
        self.pending_bytes = 0;
        let drained: Vec<Entry> = self.in_flight.drain(..).chain(self.queued.drain(..)).collect();
        let count = drained.len();
        self.ready.extend(
            drained
                .into_iter()
                .map(|entry| (entry.record, Err(WriteError::Cancelled(reason)))),
        );
        count
    }
}

/// Ordered queue of pending writes for one connection.
///
/// Application threads call [`enqueue`](Self::enqueue) while the I/O side
/// calls [`drain_next`](Self::drain_next) and [`complete`](Self::complete).
/// Records complete strictly in the order they were enqueued, even when a
/// cancellation races a completion. Completion callbacks and interceptors
/// run without the queue lock held, one at a time: a thread that decides an
/// outcome while another is running callbacks hands its records to that
/// thread.
///
/// Exceeding the configured pending limits is advisory: the record is still
/// queued, [`Admission::Overloaded`] is returned and
/// [`writable`](Self::writable) blocks producers until the backlog drains.
pub struct WriteQueue {
    connection: ConnectionId,
    config: WriteQueueConfig,
    pool: RecyclePool<RecordSlot>,
    state: Mutex<QueueState>,
    next_seq: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    space: Notify,
    arrivals: Notify,
}

impl WriteQueue {
    /// Create an empty queue for `connection`.
    #[must_use]
    pub fn new(connection: ConnectionId, config: WriteQueueConfig) -> Self {
        Self {
            connection,
            config,
            pool: RecyclePool::new(config.pool, RecordSlot::new),
            state: Mutex::new(QueueState::default()),
            next_seq: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            space: Notify::new(),
            arrivals: Notify::new(),
        }
    }

    /// Connection owning the queue.
    #[must_use]
    pub fn connection(&self) -> ConnectionId { self.connection }

    /// Configuration the queue was built with.
    #[must_use]
    pub fn config(&self) -> &WriteQueueConfig { &self.config }

    /// Append a write.
    ///
    /// # Errors
    ///
    /// Returns [`WriteQueueError::Closed`] once the queue has been cancelled.
    /// No callback runs in that case.
    pub fn enqueue(&self, request: WriteRequest) -> Result<Enqueued, WriteQueueError> {
        let bytes = request.len();
        let mut state = lock(&self.state);
        if let Some(reason) = state.closed {
            return Err(WriteQueueError::Closed {
                connection: self.connection,
                reason,
            });
        }
        let (slot, generation) = self.pool.acquire();
        let (tx, rx) = oneshot::channel();
        slot.fill(self.connection, request, tx);
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let record = WriteRecord::new(slot, generation, seq);
        state.queued.push_back(Entry {
            record: record.clone(),
            bytes,
            preset: None,
        });
        state.pending_bytes += bytes;
        let pending_records = state.pending_records();
        let pending_bytes = state.pending_bytes;
        let admission = if self.config.is_overloaded(pending_bytes, pending_records) {
            if !state.overloaded {
                state.overloaded = true;
                metrics::inc_write_overloads();
                warn!(
                    connection = %self.connection,
                    pending_bytes,
                    pending_records,
                    "write queue overloaded"
                );
            }
            Admission::Overloaded {
                pending_bytes,
                pending_records,
            }
        } else {
            Admission::Accepted
        };
        drop(state);
        self.arrivals.notify_one();
        debug!(connection = %self.connection, seq, bytes, "write enqueued");
        Ok(Enqueued {
            record,
            pending: PendingWrite::new(rx),
            admission,
        })
    }

    /// Take the oldest queued record for transmission.
    ///
    /// The record's interceptor is consulted first. Records it short-circuits
    /// are settled in submission order and never returned. Returns `None`
    /// when nothing is queued or the queue is closed.
    pub fn drain_next(&self) -> Option<WriteRecord> {
        loop {
            let (record, interceptor) = {
                let mut state = lock(&self.state);
                if state.closed.is_some() {
                    return None;
                }
                let entry = state.queued.pop_front()?;
                let record = entry.record.clone();
                let interceptor = record.with_state(|s| s.interceptor()).ok().flatten();
                state.in_flight.push_back(entry);
                (record, interceptor)
            };

            let decision = interceptor.map_or(Interception::Proceed, |i| i.before_write(&record));
            match decision {
                Interception::Proceed => {
                    let state = lock(&self.state);
                    if state
                        .in_flight
                        .iter()
                        .any(|e| e.record.sequence() == record.sequence())
                    {
                        return Some(record);
                    }
                    // cancelled while the interceptor ran
                    return None;
                }
                Interception::Complete(outcome) => {
                    debug!(connection = %self.connection, seq = record.sequence(), "write short-circuited");
                    {
                        let mut state = lock(&self.state);
                        if let Some(entry) = state
                            .in_flight
                            .iter_mut()
                            .find(|e| e.record.sequence() == record.sequence())
                        {
                            entry.preset = Some(outcome);
                        }
                        state.collect_presets();
                    }
                    self.signal_space();
                    self.run_settlements();
                }
            }
        }
    }

    /// Settle the oldest in-flight record with the transport's `result`.
    ///
    /// Depending on the [`FailurePolicy`], a failed result also cancels every
    /// later record.
    ///
    /// # Errors
    ///
    /// Returns [`WriteQueueError::OutOfOrder`] if `record` is not the oldest
    /// in-flight record.
    pub fn complete(
        &self,
        record: &WriteRecord,
        result: std::io::Result<usize>,
    ) -> Result<Settlement, WriteQueueError> {
        let outcome = result
            .map(|bytes_written| WriteReceipt { bytes_written })
            .map_err(WriteError::io);
        let cancel_rest = outcome.is_err() && self.config.failure_policy == FailurePolicy::CancelRemaining;
        let cancelled = {
            let mut state = lock(&self.state);
            match state.in_flight.front() {
                Some(front) if front.record.sequence() == record.sequence() => {}
                _ if state.closed.is_some() || record.is_recycled() => {
                    return Ok(Settlement::AlreadySettled);
                }
                front => {
                    let expected = front.map(|e| e.record.sequence());
                    error!(
                        connection = %self.connection,
                        completed = record.sequence(),
                        ?expected,
                        "write completed out of order"
                    );
                    return Err(WriteQueueError::OutOfOrder {
                        expected,
                        completed: record.sequence(),
                    });
                }
            }
            let Some(entry) = state.in_flight.pop_front() else {
                return Ok(Settlement::AlreadySettled);
            };
            state.release_bytes(entry.bytes);
            state.ready.push_back((entry.record, outcome));
            if cancel_rest {
                Some(state.close(CloseReason::WriteFailure))
            } else {
                state.collect_presets();
                None
            }
        };
        match cancelled {
            Some(count) => self.announce_close(count, CloseReason::WriteFailure),
            None => self.signal_space(),
        }
        self.run_settlements();
        Ok(Settlement::Settled)
    }

    /// Cancel every queued and in-flight record and close the queue.
    ///
    /// Each record's callback receives [`WriteError::Cancelled`] before the
    /// record is recycled. Records whose outcome was already decided, for
    /// example by a [`complete`](Self::complete) still running its
    /// callback, settle first. Calling this again, or concurrently with
    /// `complete`, settles nothing twice. Returns the number of records
    /// this call cancelled.
    pub fn cancel_all(&self, reason: CloseReason) -> usize {
        let count = lock(&self.state).close(reason);
        self.announce_close(count, reason);
        self.run_settlements();
        count
    }

    /// Wait until outstanding data falls back within the configured limits.
    ///
    /// # Errors
    ///
    /// Returns [`WriteQueueError::Closed`] if the queue is or becomes closed.
    pub async fn writable(&self) -> Result<(), WriteQueueError> {
        loop {
            let mut notified = pin!(self.space.notified());
            notified.as_mut().enable();
            {
                let state = lock(&self.state);
                if let Some(reason) = state.closed {
                    return Err(WriteQueueError::Closed {
                        connection: self.connection,
                        reason,
                    });
                }
                if !self
                    .config
                    .is_overloaded(state.pending_bytes, state.pending_records())
                {
                    return Ok(());
                }
            }
            notified.await;
        }
    }

    /// Wait until a record is queued. Returns `false` once the queue is
    /// closed.
    pub async fn ready(&self) -> bool {
        loop {
            let mut notified = pin!(self.arrivals.notified());
            notified.as_mut().enable();
            {
                let state = lock(&self.state);
                if state.closed.is_some() {
                    return false;
                }
                if !state.queued.is_empty() {
                    return true;
                }
            }
            notified.await;
        }
    }

    /// Whether [`cancel_all`](Self::cancel_all) has run.
    #[must_use]
    pub fn is_closed(&self) -> bool { lock(&self.state).closed.is_some() }

    /// Reason the queue was closed, if it was.
    #[must_use]
    pub fn close_reason(&self) -> Option<CloseReason> { lock(&self.state).closed }

    /// Whether outstanding data currently exceeds a configured limit.
    #[must_use]
    pub fn is_overloaded(&self) -> bool {
        let state = lock(&self.state);
        self.config
            .is_overloaded(state.pending_bytes, state.pending_records())
    }

    /// Snapshot the queue counters.
    #[must_use]
    pub fn stats(&self) -> WriteQueueStats {
        let state = lock(&self.state);
        WriteQueueStats {
            queued: state.queued.len(),
            in_flight: state.in_flight.len(),
            pending_bytes: state.pending_bytes,
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }

    /// Run callbacks for decided records in order until none are left.
    ///
    /// Only one thread settles at a time. A caller arriving while another
    /// thread is settling leaves its records to that thread.
    fn run_settlements(&self) {
        {
            let mut state = lock(&self.state);
            if state.settling {
                return;
            }
            state.settling = true;
        }
        loop {
            let next = {
                let mut state = lock(&self.state);
                let next = state.ready.pop_front();
                if next.is_none() {
                    state.settling = false;
                }
                next
            };
            let Some((record, outcome)) = next else {
                return;
            };
            self.settle(record, outcome);
        }
    }

    fn announce_close(&self, count: usize, reason: CloseReason) {
        self.space.notify_waiters();
        self.arrivals.notify_waiters();
        if count > 0 {
            debug!(connection = %self.connection, count, %reason, "cancelling pending writes");
        }
    }

    fn signal_space(&self) {
        let mut state = lock(&self.state);
        if state.overloaded
            && !self
                .config
                .is_overloaded(state.pending_bytes, state.pending_records())
        {
            state.overloaded = false;
            drop(state);
            debug!(connection = %self.connection, "write queue drained below limit");
            self.space.notify_waiters();
        }
    }

    /// Run the completion interceptor, callback and result handle, then
    /// recycle the record.
    fn settle(&self, record: WriteRecord, outcome: WriteOutcome) {
        let interceptor = record.with_state(|s| s.interceptor()).ok().flatten();
        let decision = interceptor.map(|i| {
            std::panic::catch_unwind(AssertUnwindSafe(|| i.on_complete(&record, &outcome)))
        });
        let outcome = match decision {
            Some(Ok(Interception::Complete(replaced))) => replaced,
            Some(Err(panic)) => {
                error!(
                    connection = %self.connection,
                    seq = record.sequence(),
                    panic = %format_panic(panic),
                    "write completion interceptor panicked"
                );
                outcome
            }
            _ => outcome,
        };
        let settlement = match &outcome {
            Ok(_) => WriteSettlement::Completed,
            Err(e) if e.is_cancelled() => WriteSettlement::Cancelled,
            Err(_) => WriteSettlement::Failed,
        };
        let counter = match settlement {
            WriteSettlement::Completed => &self.completed,
            WriteSettlement::Failed => &self.failed,
            WriteSettlement::Cancelled => &self.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::inc_writes(settlement);

        let Ok((callback, result_tx)) = record.with_state(|s| s.take_completion()) else {
            error!(connection = %self.connection, seq = record.sequence(), "settling a recycled write record");
            return;
        };
        if let Some(callback) = callback {
            let outcome_ref = &outcome;
            if let Err(panic) =
                std::panic::catch_unwind(AssertUnwindSafe(move || callback(outcome_ref)))
            {
                error!(
                    connection = %self.connection,
                    seq = record.sequence(),
                    panic = %format_panic(panic),
                    "write completion callback panicked"
                );
            }
        }
        if let Some(tx) = result_tx {
            let _ = tx.send(outcome);
        }
        if let Err(e) = self.pool.release(record.slot().clone()) {
            error!(connection = %self.connection, seq = record.sequence(), error = %e, "write record released twice");
        }
    }
}

impl Drop for WriteQueue {
    fn drop(&mut self) {
        let closed = lock(&self.state).closed.is_some();
        if !closed {
            self.cancel_all(CloseReason::Dropped);
        }
    }
}

impl std::fmt::Debug for WriteQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteQueue")
            .field("connection", &self.connection)
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
