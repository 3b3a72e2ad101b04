//! Pipeline traversal.

use std::{fmt, sync::Arc};

use tracing::{debug, warn};

use super::{Direction, IoEvent, Message, PipelineError, Stage, StageAction, StageContext};
use crate::{connection::Connection, metrics};

/// Immutable list of stages.
///
/// A pipeline is never modified in place. Rebuilding produces a new
/// pipeline that is installed on the connection, while events already
/// travelling through the old one finish there.
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
}

/// How a [`Pipeline::fire`] invocation ended.
#[derive(Debug)]
pub enum Outcome {
    /// Every stage in the event's direction continued.
    Completed,
    /// A stage handled the event fully.
    Stopped {
        /// Stage that stopped the event.
        stage: String,
    },
    /// A stage paused processing.
    Suspended(Suspension),
}

impl Outcome {
    /// Name of the stage that ended processing early, if any.
    #[must_use]
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::Completed => None,
            Self::Stopped { stage } => Some(stage),
            Self::Suspended(s) => Some(s.stage()),
        }
    }
}

/// Saved position of a suspended event.
#[must_use = "a suspended event only continues through `Pipeline::resume`"]
pub struct Suspension {
    pipeline: Arc<Pipeline>,
    stage: String,
    next: Option<usize>,
    event: IoEvent,
    message: Option<Message>,
}

impl Suspension {
    /// Stage that suspended the event.
    #[must_use]
    pub fn stage(&self) -> &str { &self.stage }

    /// Event waiting to be resumed.
    #[must_use]
    pub fn event(&self) -> &IoEvent { &self.event }
}

impl fmt::Debug for Suspension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Suspension")
            .field("stage", &self.stage)
            .field("next", &self.next)
            .field("event", &self.event)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Create a pipeline running `stages` in order.
    #[must_use]
    pub fn new(stages: Vec<Arc<dyn Stage>>) -> Self { Self { stages } }

    /// Append a stage.
    #[must_use]
    pub fn with_stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Stages in inbound order.
    #[must_use]
    pub fn stages(&self) -> &[Arc<dyn Stage>] { &self.stages }

    /// Names of the stages in inbound order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> { self.stages.iter().map(|s| s.name()).collect() }

    /// Number of stages.
    #[must_use]
    pub fn len(&self) -> usize { self.stages.len() }

    /// Whether the pipeline has no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.stages.is_empty() }

    /// Run `event` through the stages.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Closed`] for anything but a close event on a
    /// closed connection, and [`PipelineError::Stage`] if a stage fails.
    pub fn fire(
        self: &Arc<Self>,
        connection: &Connection,
        event: IoEvent,
        message: Option<Message>,
    ) -> Result<Outcome, PipelineError> {
        if connection.is_closed() && !matches!(event, IoEvent::Close(_)) {
            return Err(PipelineError::Closed(connection.id()));
        }
        let start = event.direction().start(self.len());
        run(Arc::clone(self), connection, event, message, start)
    }

    /// Continue a suspended event with the stage after the one that
    /// suspended it.
    ///
    /// The suspension keeps the pipeline it was taken from, so a rebuild
    /// installed in the meantime does not affect the resumed event.
    ///
    /// # Errors
    ///
    /// As for [`fire`](Self::fire).
    pub fn resume(suspension: Suspension, connection: &Connection) -> Result<Outcome, PipelineError> {
        let Suspension {
            pipeline,
            stage,
            next,
            event,
            message,
        } = suspension;
        if connection.is_closed() && !matches!(event, IoEvent::Close(_)) {
            return Err(PipelineError::Closed(connection.id()));
        }
        debug!(connection = %connection.id(), %stage, event = event.kind(), "resuming pipeline");
        run(pipeline, connection, event, message, next)
    }

    /// Replace the stages an event travelling in `direction` has yet to
    /// reach from `index`, returning the new chain and the position of the
    /// first replacement stage.
    fn rebuilt(
        &self,
        index: usize,
        direction: Direction,
        replacement: Vec<Arc<dyn Stage>>,
    ) -> (Self, Option<usize>) {
        match direction {
            Direction::Inbound => {
                let mut stages: Vec<_> = self.stages.iter().take(index + 1).cloned().collect();
                stages.extend(replacement);
                (Self { stages }, index.checked_add(1))
            }
            Direction::Outbound => {
                let next = replacement.len().checked_sub(1);
                let mut stages = replacement;
                stages.extend(self.stages.iter().skip(index).cloned());
                (Self { stages }, next)
            }
        }
    }
}

fn run(
    mut pipeline: Arc<Pipeline>,
    connection: &Connection,
    event: IoEvent,
    message: Option<Message>,
    start: Option<usize>,
) -> Result<Outcome, PipelineError> {
    let direction: Direction = event.direction();
    let mut ctx = StageContext::new(connection, event, message, 0);
    let mut position = start;

    while let Some((index, stage)) =
        position.and_then(|i| pipeline.stages.get(i).map(|s| (i, Arc::clone(s))))
    {
        ctx.set_position(index);
        let action = match stage.handle(&mut ctx) {
            Ok(action) => action,
            Err(source) => {
                metrics::inc_stage_errors(stage.name());
                warn!(
                    connection = %connection.id(),
                    stage = stage.name(),
                    event = ctx.event().kind(),
                    error = %source,
                    "pipeline stage failed"
                );
                return Err(PipelineError::Stage {
                    stage: stage.name().to_owned(),
                    source,
                });
            }
        };
        match action {
            StageAction::Continue => position = direction.step(index),
            StageAction::Stop => {
                return Ok(Outcome::Stopped {
                    stage: stage.name().to_owned(),
                });
            }
            StageAction::Suspend => {
                let (event, message) = ctx.into_parts();
                debug!(connection = %connection.id(), stage = stage.name(), event = event.kind(), "pipeline suspended");
                return Ok(Outcome::Suspended(Suspension {
                    pipeline,
                    stage: stage.name().to_owned(),
                    next: direction.step(index),
                    event,
                    message,
                }));
            }
            StageAction::Rebuild(replacement) => {
                let (rebuilt, next) = pipeline.rebuilt(index, direction, replacement);
                let rebuilt = Arc::new(rebuilt);
                debug!(
                    connection = %connection.id(),
                    stage = stage.name(),
                    stages = ?rebuilt.stage_names(),
                    "pipeline rebuilt"
                );
                connection.set_pipeline(Arc::clone(&rebuilt));
                pipeline = rebuilt;
                position = next;
            }
        }
    }
    Ok(Outcome::Completed)
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}
