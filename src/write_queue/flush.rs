//! Drive a [`WriteQueue`] into an asynchronous writer.

use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use super::{WriteQueue, WriteQueueError};

/// Summary of one [`WriteQueue::flush_to`] pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Flushed {
    /// Records transmitted.
    pub records: usize,
    /// Bytes transmitted.
    pub bytes: usize,
    /// Kind of the I/O error that stopped the pass, if any.
    pub failure: Option<io::ErrorKind>,
}

impl WriteQueue {
    /// Transmit every queued record to `writer` in order.
    ///
    /// Each record completes with the number of bytes written or with the
    /// I/O error that interrupted it. Flushing stops at the first failure,
    /// leaving the [`FailurePolicy`](super::FailurePolicy) to decide what
    /// happens to the remaining records.
    ///
    /// # Errors
    ///
    /// Returns [`WriteQueueError::OutOfOrder`] if another task completed
    /// records of this queue concurrently.
    pub async fn flush_to<W>(&self, writer: &mut W) -> Result<Flushed, WriteQueueError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut flushed = Flushed::default();
        while let Some(record) = self.drain_next() {
            let Ok(payload) = record.message() else {
                // settled by a concurrent cancellation
                continue;
            };
            let result = match writer.write_all(&payload).await {
                Ok(()) => writer.flush().await.map(|()| payload.len()),
                Err(e) => Err(e),
            };
            let outcome = result.as_ref().copied().map_err(io::Error::kind);
            self.complete(&record, result)?;
            match outcome {
                Ok(bytes) => {
                    flushed.records += 1;
                    flushed.bytes += bytes;
                }
                Err(kind) => {
                    debug!(connection = %self.connection(), ?kind, "flush interrupted by write failure");
                    flushed.failure = Some(kind);
                    break;
                }
            }
        }
        Ok(flushed)
    }
}
