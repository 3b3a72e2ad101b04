//! Small pipeline stages for tests.

use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use wireline::pipeline::{Stage, StageAction, StageContext, StageError};

/// Writes every `Bytes` message back to the peer and stops.
#[derive(Debug, Default)]
pub struct EchoStage;

impl Stage for EchoStage {
    fn name(&self) -> &str { "echo" }

    fn handle(&self, ctx: &mut StageContext<'_>) -> Result<StageAction, StageError> {
        if let Some(bytes) = ctx.take_message::<Bytes>() {
            ctx.write(bytes)?;
        }
        Ok(StageAction::Stop)
    }
}

/// Appends `name:event` for every event it sees and continues.
#[derive(Clone, Debug)]
pub struct TraceStage {
    name: &'static str,
    trace: Arc<Mutex<Vec<String>>>,
}

impl TraceStage {
    /// Create a stage writing to a fresh trace.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            trace: Arc::default(),
        }
    }

    /// Create a stage writing to the same trace as `self`.
    #[must_use]
    pub fn sibling(&self, name: &'static str) -> Self {
        Self {
            name,
            trace: Arc::clone(&self.trace),
        }
    }

    /// Entries recorded so far.
    #[must_use]
    pub fn entries(&self) -> Vec<String> { self.trace.lock().unwrap_or_else(PoisonError::into_inner).clone() }
}

impl Stage for TraceStage {
    fn name(&self) -> &str { self.name }

    fn handle(&self, ctx: &mut StageContext<'_>) -> Result<StageAction, StageError> {
        self.trace
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(format!("{}:{}", self.name, ctx.event().kind()));
        Ok(StageAction::Continue)
    }
}
