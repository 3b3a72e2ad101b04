//! Hooks that observe or override a record on its way through the queue.

use super::{WriteOutcome, WriteRecord};

/// Decision returned by a [`WriteInterceptor`].
#[derive(Debug)]
pub enum Interception {
    /// Carry on with the normal path.
    Proceed,
    /// Settle the record with this outcome instead.
    ///
    /// From [`WriteInterceptor::before_write`] this short-circuits
    /// transmission; the record still settles in submission order.
    Complete(WriteOutcome),
}

/// Per-record hook given first refusal before a write is issued and before
/// its completion runs.
///
/// Interceptors run without any queue lock held and may call the record's
/// accessors, for example to rewrite the payload through
/// [`WriteRecord::set_message`].
pub trait WriteInterceptor: Send + Sync {
    /// Called when the record is drained for transmission.
    fn before_write(&self, _record: &WriteRecord) -> Interception { Interception::Proceed }

    /// Called before the completion callback with the outcome about to be
    /// delivered.
    fn on_complete(&self, _record: &WriteRecord, _outcome: &WriteOutcome) -> Interception {
        Interception::Proceed
    }
}
