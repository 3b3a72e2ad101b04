//! Cache probe that records every event.

use std::sync::{Mutex, PoisonError};

use wireline::cache::{CacheEntry, CacheError, CacheKey, CacheProbe};

/// Cache event as seen by [`RecordingProbe`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProbeEvent {
    Added(CacheKey),
    Removed(CacheKey),
    Hit(CacheKey),
    Missed(CacheKey),
    Updated(CacheKey),
    Error(CacheKey, CacheError),
}

/// Records cache events in the order they are emitted.
#[derive(Debug, Default)]
pub struct RecordingProbe {
    events: Mutex<Vec<ProbeEvent>>,
}

impl RecordingProbe {
    /// Create an empty probe.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Events recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<ProbeEvent> { self.events.lock().unwrap_or_else(PoisonError::into_inner).clone() }

    /// Remove and return the recorded events.
    pub fn take(&self) -> Vec<ProbeEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Number of [`ProbeEvent::Error`] events.
    #[must_use]
    pub fn errors(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, ProbeEvent::Error(..)))
            .count()
    }

    fn push(&self, event: ProbeEvent) { self.events.lock().unwrap_or_else(PoisonError::into_inner).push(event); }
}

impl CacheProbe for RecordingProbe {
    fn on_added(&self, entry: &CacheEntry) { self.push(ProbeEvent::Added(entry.key().clone())); }

    fn on_removed(&self, entry: &CacheEntry) { self.push(ProbeEvent::Removed(entry.key().clone())); }

    fn on_hit(&self, entry: &CacheEntry) { self.push(ProbeEvent::Hit(entry.key().clone())); }

    fn on_missed(&self, key: &CacheKey) { self.push(ProbeEvent::Missed(key.clone())); }

    fn on_updated(&self, entry: &CacheEntry) { self.push(ProbeEvent::Updated(entry.key().clone())); }

    fn on_error(&self, key: &CacheKey, error: &CacheError) { self.push(ProbeEvent::Error(key.clone(), *error)); }
}
