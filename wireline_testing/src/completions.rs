//! Recording of write completion callbacks.

use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use wireline::write_queue::{WriteError, WriteOutcome, WriteRequest};

/// One observed completion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Completion {
    /// Tag given when the request was built.
    pub tag: String,
    /// Bytes written, or `None` when the write failed or was cancelled.
    pub bytes_written: Option<usize>,
    /// Whether the write was cancelled.
    pub cancelled: bool,
}

/// Collects completion callbacks in the order they run.
///
/// Cloning shares the underlying log.
#[derive(Clone, Debug, Default)]
pub struct CompletionRecorder {
    log: Arc<Mutex<Vec<Completion>>>,
}

impl CompletionRecorder {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Build a request for `payload` whose completion is recorded under
    /// `tag`.
    pub fn request(&self, tag: &str, payload: impl Into<Bytes>) -> WriteRequest {
        let log = Arc::clone(&self.log);
        let tag = tag.to_owned();
        WriteRequest::new(payload).on_complete(move |outcome: &WriteOutcome| {
            let completion = Completion {
                tag,
                bytes_written: outcome.as_ref().ok().map(|r| r.bytes_written),
                cancelled: matches!(outcome, Err(WriteError::Cancelled(_))),
            };
            log.lock().unwrap_or_else(PoisonError::into_inner).push(completion);
        })
    }

    /// Every completion observed so far.
    #[must_use]
    pub fn completions(&self) -> Vec<Completion> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Tags in completion order.
    #[must_use]
    pub fn tags(&self) -> Vec<String> { self.completions().into_iter().map(|c| c.tag).collect() }

    /// Number of cancelled writes.
    #[must_use]
    pub fn cancelled(&self) -> usize { self.completions().iter().filter(|c| c.cancelled).count() }
}
