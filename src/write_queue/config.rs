//! Write queue settings.

use serde::Deserialize;

use crate::recycle::PoolConfig;

/// What happens to queued writes after one write fails.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Cancel every later record and close the queue. A connection whose
    /// write path failed is generally unusable.
    #[default]
    CancelRemaining,
    /// Fail only the affected record and keep serving the rest.
    Isolate,
}

/// Limits and policies for a [`WriteQueue`](super::WriteQueue).
///
/// Both limits are advisory: crossing one makes
/// [`enqueue`](super::WriteQueue::enqueue) report
/// [`Admission::Overloaded`](super::Admission::Overloaded) and holds back
/// [`writable`](super::WriteQueue::writable) waiters, but the record is
/// still queued.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WriteQueueConfig {
    /// Outstanding byte count above which the queue reports overload.
    pub max_pending_bytes: Option<usize>,
    /// Outstanding record count above which the queue reports overload.
    pub max_pending_records: Option<usize>,
    /// Behaviour after a failed write.
    pub failure_policy: FailurePolicy,
    /// Settings for the record pool.
    pub pool: PoolConfig,
}

impl WriteQueueConfig {
    /// Set the pending byte limit.
    #[must_use]
    pub fn max_pending_bytes(mut self, limit: Option<usize>) -> Self {
        self.max_pending_bytes = limit;
        self
    }

    /// Set the pending record limit.
    #[must_use]
    pub fn max_pending_records(mut self, limit: Option<usize>) -> Self {
        self.max_pending_records = limit;
        self
    }

    /// Set the failure policy.
    #[must_use]
    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Enable or disable release-site capture for recycled records.
    #[must_use]
    pub fn track_recycling(mut self, enabled: bool) -> Self {
        self.pool.track_recycling = enabled;
        self
    }

    pub(crate) fn is_overloaded(&self, bytes: usize, records: usize) -> bool {
        self.max_pending_bytes.is_some_and(|limit| bytes > limit)
            || self.max_pending_records.is_some_and(|limit| records > limit)
    }
}
