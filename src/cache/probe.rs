//! Cache observers.

use thiserror::Error;

use super::{CacheEntry, CacheKey};

/// Why an insert was refused.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum CacheError {
    /// The payload exceeds the configured entry size limit.
    #[error("entry of {size} bytes exceeds the {max} byte entry limit")]
    EntryTooLarge {
        /// Payload size.
        size: u64,
        /// Configured limit.
        max: usize,
    },
    /// The payload alone exceeds the heap budget.
    #[error("entry of {size} bytes exceeds the {budget} byte heap budget")]
    ExceedsHeap {
        /// Payload size.
        size: u64,
        /// Configured budget.
        budget: u64,
    },
    /// The cache is configured to hold no entries.
    #[error("cache holds no entries")]
    NoCapacity,
    /// The cache is disabled.
    #[error("cache is disabled")]
    Disabled,
}

/// Observer notified of every cache event.
///
/// Callbacks run synchronously on the thread that caused the event and
/// must not block. All methods default to doing nothing.
pub trait CacheProbe: Send + Sync {
    /// A new entry became resident.
    fn on_added(&self, _entry: &CacheEntry) {}

    /// An entry left the cache through eviction, expiry or invalidation.
    fn on_removed(&self, _entry: &CacheEntry) {}

    /// A lookup found `entry`.
    fn on_hit(&self, _entry: &CacheEntry) {}

    /// A lookup found nothing for `key`.
    fn on_missed(&self, _key: &CacheKey) {}

    /// An existing entry was replaced by `entry`.
    fn on_updated(&self, _entry: &CacheEntry) {}

    /// An insert for `key` was rejected.
    fn on_error(&self, _key: &CacheKey, _error: &CacheError) {}
}
