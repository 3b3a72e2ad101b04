//! Asynchronous, backpressure-aware write path.
//!
//! Every connection owns one [`WriteQueue`]. Producers
//! [`enqueue`](WriteQueue::enqueue) payloads and receive a [`WriteRecord`]
//! handle plus a [`PendingWrite`] future; the I/O side drains records in
//! submission order and completes them with the transport result. Records
//! are drawn from a [`RecyclePool`](crate::recycle::RecyclePool) and become
//! unusable once settled.

mod config;
mod errors;
mod flush;
mod interceptor;
mod queue;
mod record;

pub use config::{FailurePolicy, WriteQueueConfig};
pub use errors::{WriteError, WriteQueueError};
pub use flush::Flushed;
pub use interceptor::{Interception, WriteInterceptor};
pub use queue::{Admission, Enqueued, Settlement, WriteQueue, WriteQueueStats};
pub use record::{
    CompletionHandler,
    PendingWrite,
    WriteOutcome,
    WriteReceipt,
    WriteRecord,
    WriteRequest,
};
