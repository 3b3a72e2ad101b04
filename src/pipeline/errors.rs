//! Error types for pipeline processing.

use std::io;

use thiserror::Error;

use crate::{connection::ConnectionId, recycle::RecycleError, write_queue::WriteQueueError};

/// Failure reported by a single stage.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum StageError {
    /// I/O failure while handling the event.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    /// The peer violated the protocol the stage implements.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The event carried a message of an unexpected type.
    #[error("unexpected message; expected {expected}")]
    UnexpectedMessage {
        /// Type the stage expected.
        expected: &'static str,
    },
    /// Writing to the connection failed.
    #[error(transparent)]
    WriteQueue(#[from] WriteQueueError),
    /// A recycled object was touched.
    #[error(transparent)]
    Recycled(#[from] RecycleError),
}

impl StageError {
    /// Build a protocol error from any displayable message.
    pub fn protocol(message: impl Into<String>) -> Self { Self::Protocol(message.into()) }
}

/// Failure of a whole pipeline invocation.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A stage returned an error; processing stopped there.
    #[error("stage `{stage}` failed: {source}")]
    Stage {
        /// Name of the failing stage.
        stage: String,
        /// Error returned by the stage.
        #[source]
        source: StageError,
    },
    /// The connection was already closed.
    #[error("{0} is closed")]
    Closed(ConnectionId),
}
