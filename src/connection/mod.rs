//! Established connections and their per-connection state.
//!
//! A [`Connection`] owns the attribute store shared by its pipeline stages,
//! the ordered [`WriteQueue`] for outbound data and the [`Pipeline`]
//! currently processing its events. Closing a connection cancels every
//! pending write and clears its attributes.

mod counter;
mod registry;

use std::{
    fmt,
    net::SocketAddr,
    sync::{Arc, PoisonError, RwLock},
};

use bytes::Bytes;
use counter::ActiveConnection;
pub use counter::active_connection_count;
pub use registry::ConnectionRegistry;
use tracing::{debug, info};

use crate::{
    attributes::AttributeStore,
    pipeline::{IoEvent, Message, Outcome, Pipeline, PipelineError},
    sync::{AtomicBool, Mutex, Ordering, lock},
    write_queue::{Enqueued, WriteQueue, WriteQueueConfig, WriteQueueError, WriteRequest},
};

/// Identifier assigned to a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl From<u64> for ConnectionId {
    fn from(value: u64) -> Self { Self(value) }
}

impl ConnectionId {
    /// Create a new [`ConnectionId`] with the provided value.
    #[must_use]
    pub fn new(id: u64) -> Self { Self(id) }

    /// Return the inner `u64` representation.
    #[must_use]
    pub fn as_u64(&self) -> u64 { self.0 }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "ConnectionId({})", self.0) }
}

/// Why a connection, or its write queue, was closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// The local side closed the connection.
    Local,
    /// The peer closed the connection.
    Remote,
    /// A write failed and the remaining writes were abandoned.
    WriteFailure,
    /// The connection sat idle past its timeout.
    IdleTimeout,
    /// A pipeline stage failed.
    StageFailure,
    /// The listener is shutting down.
    Shutdown,
    /// The owner was dropped without closing.
    Dropped,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Local => "closed locally",
            Self::Remote => "closed by peer",
            Self::WriteFailure => "write failure",
            Self::IdleTimeout => "idle timeout",
            Self::StageFailure => "stage failure",
            Self::Shutdown => "shutdown",
            Self::Dropped => "dropped",
        })
    }
}

/// One established endpoint.
pub struct Connection {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    attributes: AttributeStore,
    write_queue: WriteQueue,
    pipeline: RwLock<Arc<Pipeline>>,
    closed: AtomicBool,
    close_requested: Mutex<Option<CloseReason>>,
    _active: ActiveConnection,
}

impl Connection {
    /// Create an open connection processed by `pipeline`.
    #[must_use]
    pub fn new(id: ConnectionId, pipeline: Arc<Pipeline>, write_queue: WriteQueueConfig) -> Self {
        Self {
            id,
            peer: None,
            attributes: AttributeStore::new(),
            write_queue: WriteQueue::new(id, write_queue),
            pipeline: RwLock::new(pipeline),
            closed: AtomicBool::new(false),
            close_requested: Mutex::new(None),
            _active: ActiveConnection::new(),
        }
    }

    /// Record the peer address.
    #[must_use]
    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    /// Connection identifier.
    #[must_use]
    pub fn id(&self) -> ConnectionId { self.id }

    /// Peer address, when known.
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> { self.peer }

    /// Attributes shared by the connection's stages.
    #[must_use]
    pub fn attributes(&self) -> &AttributeStore { &self.attributes }

    /// Ordered queue of outbound writes.
    #[must_use]
    pub fn write_queue(&self) -> &WriteQueue { &self.write_queue }

    /// Pipeline that will process the next event.
    #[must_use]
    pub fn pipeline(&self) -> Arc<Pipeline> {
        Arc::clone(&self.pipeline.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Install a new pipeline for subsequent events.
    pub fn set_pipeline(&self, pipeline: Arc<Pipeline>) {
        *self.pipeline.write().unwrap_or_else(PoisonError::into_inner) = pipeline;
    }

    /// Run `event` through the current pipeline.
    ///
    /// # Errors
    ///
    /// See [`Pipeline::fire`].
    pub fn fire(&self, event: IoEvent, message: Option<Message>) -> Result<Outcome, PipelineError> {
        self.pipeline().fire(self, event, message)
    }

    /// Queue `payload` for transmission.
    ///
    /// # Errors
    ///
    /// Returns [`WriteQueueError::Closed`] once the connection is closing.
    pub fn write(&self, payload: impl Into<Bytes>) -> Result<Enqueued, WriteQueueError> {
        self.write_queue.enqueue(WriteRequest::new(payload))
    }

    /// Ask the connection's driver to close the connection.
    ///
    /// The first request wins.
    pub fn request_close(&self, reason: CloseReason) {
        let mut requested = lock(&self.close_requested);
        if requested.is_none() {
            debug!(connection = %self.id, %reason, "close requested");
            *requested = Some(reason);
        }
    }

    /// Pending close request, if any.
    #[must_use]
    pub fn close_requested(&self) -> Option<CloseReason> { *lock(&self.close_requested) }

    /// Close the connection.
    ///
    /// Pending writes are cancelled with `reason` before this returns and
    /// the attribute store is cleared. Only the first call has any effect;
    /// it returns `true`.
    pub fn close(&self, reason: CloseReason) -> bool {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let cancelled = self.write_queue.cancel_all(reason);
        self.attributes.clear();
        info!(
            connection = %self.id,
            peer = ?self.peer,
            %reason,
            cancelled,
            "connection closed"
        );
        true
    }

    /// Whether [`close`](Self::close) has run.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.closed.load(Ordering::Acquire) }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .field("pipeline", &self.pipeline())
            .finish_non_exhaustive()
    }
}

#[cfg(all(test, not(loom)))]
mod tests;
