//! Error types for the write path.

use std::{io, sync::Arc};

use thiserror::Error;

use crate::{
    connection::{CloseReason, ConnectionId},
    recycle::RecycleError,
};

/// Failure delivered to a write record's completion.
#[non_exhaustive]
#[derive(Debug, Error, Clone)]
pub enum WriteError {
    /// The transport failed to transmit the payload.
    #[error("transport error: {0}")]
    Io(Arc<io::Error>),
    /// The write was cancelled before it could be transmitted.
    #[error("write cancelled: {0}")]
    Cancelled(CloseReason),
    /// An interceptor refused the write.
    #[error("write aborted: {0}")]
    Aborted(String),
    /// The queue went away without settling the record.
    #[error("write abandoned before completion")]
    Abandoned,
}

impl WriteError {
    /// Wrap an I/O error.
    #[must_use]
    pub fn io(error: io::Error) -> Self { Self::Io(Arc::new(error)) }

    /// Whether the record was cancelled rather than failed.
    #[must_use]
    pub fn is_cancelled(&self) -> bool { matches!(self, Self::Cancelled(_)) }
}

/// Misuse of the write queue.
#[non_exhaustive]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WriteQueueError {
    /// The queue was cancelled and accepts no more records.
    #[error("write queue for {connection} is closed: {reason}")]
    Closed {
        /// Connection owning the queue.
        connection: ConnectionId,
        /// Why the queue was closed.
        reason: CloseReason,
    },
    /// A record was completed while an older record was still in flight.
    #[error("record {completed} completed out of order; next in flight is {expected:?}")]
    OutOfOrder {
        /// Sequence number of the oldest in-flight record, if any.
        expected: Option<u64>,
        /// Sequence number of the record passed to `complete`.
        completed: u64,
    },
    /// A record handle was used after recycling.
    #[error(transparent)]
    Recycled(#[from] RecycleError),
}
