//! Live monitoring views.
//!
//! Listeners register a [`MonitoringView`] for each monitored object under a
//! [`ViewKey`]. Snapshots are taken on demand, so values always reflect the
//! object's current state. A key can hold at most one view at a time;
//! registering it twice is a programming error.

mod snapshot;

use std::{
    collections::BTreeMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use dashmap::{DashMap, mapref::entry::Entry};
pub use snapshot::{MonitoredValue, MonitoringSnapshot};
use thiserror::Error;
use tracing::{debug, error};

/// Read-only live view of a monitored object.
pub trait MonitoringView: Send + Sync {
    /// Current attribute values.
    fn snapshot(&self) -> MonitoringSnapshot;
}

/// Location of a view: the owning listener and the slot within it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewKey {
    /// Owner, usually the listener name.
    pub scope: String,
    /// Slot within the owner, such as `"codec"` or `"cache"`.
    pub slot: String,
}

impl ViewKey {
    /// Build a key.
    #[must_use]
    pub fn new(scope: impl Into<String>, slot: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            slot: slot.into(),
        }
    }
}

impl fmt::Display for ViewKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}/{}", self.scope, self.slot) }
}

/// Errors raised by [`MonitoringRegistry`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MonitoringError {
    /// A view is already registered under the key.
    #[error("a monitoring view is already registered at {0}")]
    Duplicate(ViewKey),
}

/// Registration activity counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Successful registrations.
    pub registrations: u64,
    /// Successful deregistrations.
    pub deregistrations: u64,
}

/// Concurrent map of [`ViewKey`] to live views.
#[derive(Default)]
pub struct MonitoringRegistry {
    views: DashMap<ViewKey, Arc<dyn MonitoringView>>,
    registrations: AtomicU64,
    deregistrations: AtomicU64,
}

impl MonitoringRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Register `view` under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`MonitoringError::Duplicate`] if `key` already holds a view;
    /// the existing view stays registered.
    pub fn register(&self, key: ViewKey, view: Arc<dyn MonitoringView>) -> Result<(), MonitoringError> {
        match self.views.entry(key) {
            Entry::Occupied(entry) => {
                error!(key = %entry.key(), "duplicate monitoring view registration");
                Err(MonitoringError::Duplicate(entry.key().clone()))
            }
            Entry::Vacant(entry) => {
                debug!(key = %entry.key(), "monitoring view registered");
                entry.insert(view);
                self.registrations.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        }
    }

    /// Remove the view under `key`, returning it if one was registered.
    pub fn deregister(&self, key: &ViewKey) -> Option<Arc<dyn MonitoringView>> {
        let (_, view) = self.views.remove(key)?;
        self.deregistrations.fetch_add(1, Ordering::Relaxed);
        debug!(%key, "monitoring view deregistered");
        Some(view)
    }

    /// Whether `key` holds a view.
    #[must_use]
    pub fn contains(&self, key: &ViewKey) -> bool { self.views.contains_key(key) }

    /// Snapshot the view under `key`.
    #[must_use]
    pub fn snapshot(&self, key: &ViewKey) -> Option<MonitoringSnapshot> {
        let view = self.views.get(key).map(|v| Arc::clone(v.value()))?;
        Some(view.snapshot())
    }

    /// Snapshot every view belonging to `scope`, keyed by slot.
    #[must_use]
    pub fn snapshot_scope(&self, scope: &str) -> BTreeMap<String, MonitoringSnapshot> {
        self.live_views()
            .into_iter()
            .filter(|(key, _)| key.scope == scope)
            .map(|(key, view)| (key.slot, view.snapshot()))
            .collect()
    }

    /// Snapshot every registered view, keyed by `scope/slot`.
    #[must_use]
    pub fn snapshot_all(&self) -> BTreeMap<String, MonitoringSnapshot> {
        self.live_views()
            .into_iter()
            .map(|(key, view)| (key.to_string(), view.snapshot()))
            .collect()
    }

    /// Registered keys in sorted order.
    #[must_use]
    pub fn keys(&self) -> Vec<ViewKey> {
        let mut keys: Vec<_> = self.views.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Number of registered views.
    #[must_use]
    pub fn len(&self) -> usize { self.views.len() }

    /// Whether no view is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.views.is_empty() }

    /// Registration activity so far.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            registrations: self.registrations.load(Ordering::Relaxed),
            deregistrations: self.deregistrations.load(Ordering::Relaxed),
        }
    }

    // Views are cloned out first so snapshots never run under a shard lock.
    fn live_views(&self) -> Vec<(ViewKey, Arc<dyn MonitoringView>)> {
        self.views
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect()
    }
}

impl fmt::Debug for MonitoringRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitoringRegistry")
            .field("keys", &self.keys())
            .field("stats", &self.stats())
            .finish()
    }
}
