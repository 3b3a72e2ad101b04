//! Pooled write records and the handles that reach them.

use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use bytes::Bytes;
use tokio::sync::oneshot;

use super::{WriteError, WriteInterceptor};
use crate::{
    connection::ConnectionId,
    recycle::{Lifecycle, RecycleError, Recyclable, ReleaseSite},
    sync::{Mutex, lock},
};

/// Result of a settled write.
pub type WriteOutcome = Result<WriteReceipt, WriteError>;

/// Callback invoked exactly once when a record settles.
pub type CompletionHandler = Box<dyn FnOnce(&WriteOutcome) + Send + 'static>;

/// Successful transmission details.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WriteReceipt {
    /// Bytes handed to the transport.
    pub bytes_written: usize,
}

/// Everything a caller supplies for one write.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use wireline::write_queue::WriteRequest;
///
/// let request = WriteRequest::new(Bytes::from_static(b"hello"))
///     .on_complete(|outcome| assert!(outcome.is_ok()));
/// assert_eq!(request.len(), 5);
/// ```
#[must_use]
pub struct WriteRequest {
    pub(super) payload: Bytes,
    pub(super) callback: Option<CompletionHandler>,
    pub(super) interceptor: Option<Arc<dyn WriteInterceptor>>,
}

impl WriteRequest {
    /// Start a request for `payload`.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            callback: None,
            interceptor: None,
        }
    }

    /// Register a completion callback.
    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&WriteOutcome) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Attach an interceptor consulted before transmission and on completion.
    pub fn intercept(mut self, interceptor: Arc<dyn WriteInterceptor>) -> Self {
        self.interceptor = Some(interceptor);
        self
    }

    /// Payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize { self.payload.len() }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.payload.is_empty() }
}

impl std::fmt::Debug for WriteRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteRequest")
            .field("len", &self.payload.len())
            .field("callback", &self.callback.is_some())
            .field("interceptor", &self.interceptor.is_some())
            .finish()
    }
}

#[derive(Default)]
pub(super) struct RecordState {
    life: Lifecycle,
    connection: Option<ConnectionId>,
    original: Bytes,
    message: Bytes,
    callback: Option<CompletionHandler>,
    interceptor: Option<Arc<dyn WriteInterceptor>>,
    result_tx: Option<oneshot::Sender<WriteOutcome>>,
}

impl RecordState {
    pub(super) fn take_completion(
        &mut self,
    ) -> (Option<CompletionHandler>, Option<oneshot::Sender<WriteOutcome>>) {
        (self.callback.take(), self.result_tx.take())
    }

    pub(super) fn interceptor(&self) -> Option<Arc<dyn WriteInterceptor>> {
        self.interceptor.clone()
    }
}

/// Shared storage cell that the record pool hands out repeatedly.
#[derive(Clone)]
pub(super) struct RecordSlot(Arc<Mutex<RecordState>>);

impl RecordSlot {
    pub(super) fn new() -> Self { Self(Arc::new(Mutex::new(RecordState::default()))) }

    pub(super) fn fill(
        &self,
        connection: ConnectionId,
        request: WriteRequest,
        result_tx: oneshot::Sender<WriteOutcome>,
    ) {
        let mut state = lock(&self.0);
        state.connection = Some(connection);
        state.message = request.payload.clone();
        state.original = request.payload;
        state.callback = request.callback;
        state.interceptor = request.interceptor;
        state.result_tx = Some(result_tx);
    }
}

impl Recyclable for RecordSlot {
    fn activate(&mut self, track: bool) -> u64 { lock(&self.0).life.activate(track) }

    fn recycle(&mut self, site: ReleaseSite) -> Result<(), RecycleError> {
        let mut state = lock(&self.0);
        state.life.retire(site)?;
        state.connection = None;
        state.original = Bytes::new();
        state.message = Bytes::new();
        state.callback = None;
        state.interceptor = None;
        state.result_tx = None;
        Ok(())
    }
}

/// Handle to one pending write.
///
/// The underlying storage is pooled. Once the write settles the storage is
/// recycled and every accessor on this handle returns
/// [`RecycleError::Recycled`], even if the storage has since been reused
/// for another write.
#[derive(Clone)]
pub struct WriteRecord {
    slot: RecordSlot,
    generation: u64,
    seq: u64,
}

impl WriteRecord {
    pub(super) fn new(slot: RecordSlot, generation: u64, seq: u64) -> Self {
        Self {
            slot,
            generation,
            seq,
        }
    }

    pub(super) fn slot(&self) -> &RecordSlot { &self.slot }

    pub(super) fn with_state<R>(
        &self,
        f: impl FnOnce(&mut RecordState) -> R,
    ) -> Result<R, RecycleError> {
        let mut state = lock(&self.slot.0);
        state.life.check(self.generation)?;
        Ok(f(&mut state))
    }

    /// Position of the record in its queue's submission order.
    ///
    /// This is handle identity and stays readable after recycling.
    #[must_use]
    pub fn sequence(&self) -> u64 { self.seq }

    /// Connection the record will be written to.
    ///
    /// # Errors
    ///
    /// Returns [`RecycleError::Recycled`] after the record settled.
    pub fn connection(&self) -> Result<ConnectionId, RecycleError> {
        self.with_state(|s| s.connection)?
            .ok_or(RecycleError::Recycled { released_at: None })
    }

    /// Payload as originally enqueued.
    ///
    /// # Errors
    ///
    /// Returns [`RecycleError::Recycled`] after the record settled.
    pub fn original(&self) -> Result<Bytes, RecycleError> { self.with_state(|s| s.original.clone()) }

    /// Payload that will be transmitted, after any rewrite.
    ///
    /// # Errors
    ///
    /// Returns [`RecycleError::Recycled`] after the record settled.
    pub fn message(&self) -> Result<Bytes, RecycleError> { self.with_state(|s| s.message.clone()) }

    /// Replace the payload that will be transmitted.
    ///
    /// # Errors
    ///
    /// Returns [`RecycleError::Recycled`] after the record settled.
    pub fn set_message(&self, message: impl Into<Bytes>) -> Result<(), RecycleError> {
        let message = message.into();
        self.with_state(|s| s.message = message)
    }

    /// Length of the payload that will be transmitted.
    ///
    /// # Errors
    ///
    /// Returns [`RecycleError::Recycled`] after the record settled.
    pub fn len(&self) -> Result<usize, RecycleError> { self.with_state(|s| s.message.len()) }

    /// Whether the transmitted payload is empty.
    ///
    /// # Errors
    ///
    /// Returns [`RecycleError::Recycled`] after the record settled.
    pub fn is_empty(&self) -> Result<bool, RecycleError> {
        self.with_state(|s| s.message.is_empty())
    }

    /// Whether the record has settled and been recycled.
    #[must_use]
    pub fn is_recycled(&self) -> bool {
        lock(&self.slot.0).life.check(self.generation).is_err()
    }
}

impl PartialEq for WriteRecord {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.slot.0, &other.slot.0) && self.generation == other.generation
    }
}

impl std::fmt::Debug for WriteRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteRecord")
            .field("seq", &self.seq)
            .field("generation", &self.generation)
            .field("recycled", &self.is_recycled())
            .finish()
    }
}

/// Future resolving to the outcome of an enqueued write.
#[must_use = "dropping the handle does not cancel the write"]
#[derive(Debug)]
pub struct PendingWrite {
    rx: oneshot::Receiver<WriteOutcome>,
}

impl PendingWrite {
    pub(super) fn new(rx: oneshot::Receiver<WriteOutcome>) -> Self { Self { rx } }

    /// Return the outcome if the record has already settled.
    pub fn try_outcome(&mut self) -> Option<WriteOutcome> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(WriteError::Abandoned)),
        }
    }
}

impl Future for PendingWrite {
    type Output = WriteOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.unwrap_or(Err(WriteError::Abandoned)))
    }
}
