//! Per-invocation state handed to each stage.

use std::any::Any;

use bytes::Bytes;

use super::IoEvent;
use crate::{
    attributes::AttributeStore,
    connection::{CloseReason, Connection},
    write_queue::{Enqueued, WriteQueueError, WriteRequest},
};

/// Type-erased message travelling along the pipeline.
pub type Message = Box<dyn Any + Send>;

/// View of one event as it moves from stage to stage.
///
/// The context carries the connection (and through it the attribute store
/// and write queue), the event being processed and an optional message that
/// stages may replace, for example a codec turning raw bytes into a parsed
/// request.
pub struct StageContext<'a> {
    connection: &'a Connection,
    event: IoEvent,
    message: Option<Message>,
    position: usize,
}

impl<'a> StageContext<'a> {
    pub(super) fn new(
        connection: &'a Connection,
        event: IoEvent,
        message: Option<Message>,
        position: usize,
    ) -> Self {
        Self {
            connection,
            event,
            message,
            position,
        }
    }

    pub(super) fn set_position(&mut self, position: usize) { self.position = position; }

    pub(super) fn into_parts(self) -> (IoEvent, Option<Message>) { (self.event, self.message) }

    /// Connection the event belongs to.
    #[must_use]
    pub fn connection(&self) -> &'a Connection { self.connection }

    /// Connection attribute store.
    #[must_use]
    pub fn attributes(&self) -> &'a AttributeStore { self.connection.attributes() }

    /// Event being processed.
    #[must_use]
    pub fn event(&self) -> &IoEvent { &self.event }

    /// Index of the stage currently handling the event.
    #[must_use]
    pub fn position(&self) -> usize { self.position }

    /// Whether a message is attached.
    #[must_use]
    pub fn has_message(&self) -> bool { self.message.is_some() }

    /// Borrow the message as `T`.
    #[must_use]
    pub fn message<T: Any>(&self) -> Option<&T> {
        self.message.as_ref().and_then(|m| m.downcast_ref::<T>())
    }

    /// Take the message if it is a `T`, leaving other types in place.
    pub fn take_message<T: Any>(&mut self) -> Option<T> {
        match self.message.take()?.downcast::<T>() {
            Ok(message) => Some(*message),
            Err(other) => {
                self.message = Some(other);
                None
            }
        }
    }

    /// Replace the message passed to later stages.
    pub fn set_message<T: Any + Send>(&mut self, message: T) { self.message = Some(Box::new(message)); }

    /// Drop the attached message.
    pub fn clear_message(&mut self) { self.message = None; }

    /// Queue `payload` on the connection's write queue.
    ///
    /// # Errors
    ///
    /// Returns [`WriteQueueError::Closed`] if the connection is closing.
    pub fn write(&self, payload: impl Into<Bytes>) -> Result<Enqueued, WriteQueueError> {
        self.connection.write_queue().enqueue(WriteRequest::new(payload))
    }

    /// Ask the owner of the connection to close it once the current event
    /// has been processed.
    pub fn request_close(&self, reason: CloseReason) { self.connection.request_close(reason); }
}

impl std::fmt::Debug for StageContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageContext")
            .field("connection", &self.connection.id())
            .field("event", &self.event)
            .field("has_message", &self.message.is_some())
            .field("position", &self.position)
            .finish()
    }
}
