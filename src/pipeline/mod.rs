//! Ordered chain of protocol-processing stages.
//!
//! Every connection runs its events through a [`Pipeline`]. Each [`Stage`]
//! inspects the [`StageContext`] and answers with a [`StageAction`]:
//! continue to the next stage, stop, suspend until resumed, or rebuild the
//! rest of the chain (for example after a protocol upgrade).

use std::{fmt, io, sync::Arc};

use crate::{connection::CloseReason, monitoring::MonitoringView};

mod chain;
mod context;
mod errors;

pub use chain::{Outcome, Pipeline, Suspension};
pub use context::{Message, StageContext};
pub use errors::{PipelineError, StageError};

/// I/O event delivered to a pipeline.
#[derive(Clone, Debug)]
pub enum IoEvent {
    /// A connection was accepted by a listener.
    Accept,
    /// An outbound connection was established.
    Connect,
    /// Data was read from the peer.
    Read,
    /// Data is about to be written to the peer.
    Write,
    /// The connection is closing.
    Close(CloseReason),
    /// The transport reported an error.
    Error(Arc<io::Error>),
}

impl IoEvent {
    /// Direction the event travels through the stages.
    #[must_use]
    pub fn direction(&self) -> Direction {
        match self {
            Self::Write => Direction::Outbound,
            _ => Direction::Inbound,
        }
    }

    /// Short label used in logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Connect => "connect",
            Self::Read => "read",
            Self::Write => "write",
            Self::Close(_) => "close",
            Self::Error(_) => "error",
        }
    }

    /// Whether this is an [`IoEvent::Error`].
    #[must_use]
    pub fn is_error(&self) -> bool { matches!(self, Self::Error(_)) }
}

/// Order in which stages see an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// First stage to last.
    Inbound,
    /// Last stage to first.
    Outbound,
}

impl Direction {
    pub(crate) fn start(self, len: usize) -> Option<usize> {
        match self {
            Self::Inbound => (len > 0).then_some(0),
            Self::Outbound => len.checked_sub(1),
        }
    }

    pub(crate) fn step(self, index: usize) -> Option<usize> {
        match self {
            Self::Inbound => index.checked_add(1),
            Self::Outbound => index.checked_sub(1),
        }
    }
}

/// Decision returned by a stage.
pub enum StageAction {
    /// Pass the event to the next stage.
    Continue,
    /// The event is fully handled.
    Stop,
    /// Pause until [`Pipeline::resume`] is called with the returned
    /// [`Suspension`].
    Suspend,
    /// Replace the stages the event has yet to reach and carry on with the
    /// replacement.
    ///
    /// Inbound events replace everything after the current stage. Write
    /// events travel backwards, so they replace everything before it and
    /// continue with the last replacement stage.
    Rebuild(Vec<Arc<dyn Stage>>),
}

impl fmt::Debug for StageAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Continue => f.write_str("Continue"),
            Self::Stop => f.write_str("Stop"),
            Self::Suspend => f.write_str("Suspend"),
            Self::Rebuild(stages) => f
                .debug_tuple("Rebuild")
                .field(&stages.iter().map(|s| s.name()).collect::<Vec<_>>())
                .finish(),
        }
    }
}

/// One unit of protocol-processing logic.
///
/// Stages are shared between connections, so per-connection state belongs
/// in the connection's attribute store rather than in the stage itself.
///
/// # Examples
///
/// ```
/// use wireline::pipeline::{Stage, StageAction, StageContext, StageError};
///
/// struct Echo;
///
/// impl Stage for Echo {
///     fn name(&self) -> &str { "echo" }
///
///     fn handle(&self, ctx: &mut StageContext<'_>) -> Result<StageAction, StageError> {
///         if let Some(bytes) = ctx.take_message::<bytes::Bytes>() {
///             ctx.write(bytes)?;
///         }
///         Ok(StageAction::Stop)
///     }
/// }
/// ```
pub trait Stage: Send + Sync {
    /// Name used in logs, metrics and monitoring.
    fn name(&self) -> &str;

    /// Process one event.
    ///
    /// # Errors
    ///
    /// Returning an error stops the pipeline and is reported as
    /// [`PipelineError::Stage`].
    fn handle(&self, ctx: &mut StageContext<'_>) -> Result<StageAction, StageError>;

    /// Monitoring view describing this stage instance, if it has one.
    fn monitoring_view(&self) -> Option<Arc<dyn MonitoringView>> { None }
}
