//! The resource cache itself.

use std::{
    sync::{
        Arc,
        PoisonError,
        RwLock,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use dashmap::DashMap;
use tracing::{debug, warn};

use super::{CacheConfig, CacheEntry, CacheError, CacheKey, CacheProbe, EntryMetadata};
use crate::{
    metrics::{self, CacheEvent},
    monitoring::{MonitoringSnapshot, MonitoringView},
    sync::{Mutex, lock},
};

/// Result of [`ResourceCache::insert`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The key was not resident before.
    Added,
    /// The key was resident and its entry was replaced.
    Updated,
    /// The entry was refused.
    Rejected(CacheError),
}

/// Counters describing a cache.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Whether the cache is serving requests.
    pub enabled: bool,
    /// Configured entry size limit.
    pub max_entry_size: usize,
    /// Resident entries.
    pub entries: usize,
    /// Lookups that found an entry.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Rejected inserts.
    pub errors: u64,
    /// Inserts that replaced a resident entry.
    pub updates: u64,
    /// Inserts that added a new key.
    pub additions: u64,
    /// Entries evicted, expired or invalidated.
    pub removals: u64,
    /// Sum of resident payload sizes.
    pub heap_bytes: u64,
}

enum Notice {
    Added(Arc<CacheEntry>),
    Removed(Arc<CacheEntry>),
    Hit(Arc<CacheEntry>),
    Missed(CacheKey),
    Updated(Arc<CacheEntry>),
    Error(CacheKey, CacheError),
}

impl Notice {
    fn event(&self) -> CacheEvent {
        match self {
            Self::Added(_) => CacheEvent::Added,
            Self::Removed(_) => CacheEvent::Removed,
            Self::Hit(_) => CacheEvent::Hit,
            Self::Missed(_) => CacheEvent::Missed,
            Self::Updated(_) => CacheEvent::Updated,
            Self::Error(..) => CacheEvent::Error,
        }
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    updates: AtomicU64,
    additions: AtomicU64,
    removals: AtomicU64,
}

impl Counters {
    fn record(&self, notice: &Notice) {
        let counter = match notice {
            Notice::Added(_) => &self.additions,
            Notice::Removed(_) => &self.removals,
            Notice::Hit(_) => &self.hits,
            Notice::Missed(_) => &self.misses,
            Notice::Updated(_) => &self.updates,
            Notice::Error(..) => &self.errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Bounded cache of static resources.
///
/// Lookups read a concurrent map of fully built entries and never wait for
/// inserts. Inserts, evictions and invalidations are serialized by one
/// mutex so the resident byte count and entry count stay exact. When room
/// is needed the least recently used entries are evicted first.
///
/// Every event is reported to the registered [`CacheProbe`]s after the
/// structural change is complete.
pub struct ResourceCache {
    name: String,
    config: CacheConfig,
    enabled: AtomicBool,
    entries: DashMap<CacheKey, Arc<CacheEntry>>,
    heap_bytes: Mutex<u64>,
    clock: AtomicU64,
    counters: Counters,
    probes: RwLock<Vec<Arc<dyn CacheProbe>>>,
}

impl ResourceCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new(name: impl Into<String>, config: CacheConfig) -> Self {
        Self {
            name: name.into(),
            config,
            enabled: AtomicBool::new(config.enabled),
            entries: DashMap::new(),
            heap_bytes: Mutex::new(0),
            clock: AtomicU64::new(0),
            counters: Counters::default(),
            probes: RwLock::new(Vec::new()),
        }
    }

    /// Cache name used in logs and metrics.
    #[must_use]
    pub fn name(&self) -> &str { &self.name }

    /// Configured limits.
    #[must_use]
    pub fn config(&self) -> &CacheConfig { &self.config }

    /// Whether the cache serves lookups and inserts.
    #[must_use]
    pub fn is_enabled(&self) -> bool { self.enabled.load(Ordering::Acquire) }

    /// Turn the cache on or off. Resident entries are kept.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
        debug!(cache = %self.name, enabled, "cache toggled");
    }

    /// Register an observer.
    pub fn add_probe(&self, probe: Arc<dyn CacheProbe>) {
        self.probes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(probe);
    }

    /// Remove a previously registered observer. Returns `false` if it was
    /// not registered.
    pub fn remove_probe(&self, probe: &Arc<dyn CacheProbe>) -> bool {
        let mut probes = self.probes.write().unwrap_or_else(PoisonError::into_inner);
        let before = probes.len();
        probes.retain(|p| !Arc::ptr_eq(p, probe));
        probes.len() != before
    }

    /// Find the entry for `key`.
    ///
    /// Expired entries are removed and reported as a miss. A disabled cache
    /// always returns `None` without counting.
    pub fn lookup(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        if !self.is_enabled() {
            return None;
        }
        let found = self.entries.get(key).map(|e| Arc::clone(e.value()));
        let mut notices = Vec::with_capacity(2);
        let result = match found {
            Some(entry) if entry.is_expired(self.config.max_age) => {
                if let Some(expired) = self.remove_exact(&entry) {
                    debug!(cache = %self.name, %key, "cache entry expired");
                    notices.push(Notice::Removed(expired));
                }
                notices.push(Notice::Missed(key.clone()));
                None
            }
            Some(entry) => {
                entry.touch(self.tick());
                notices.push(Notice::Hit(Arc::clone(&entry)));
                Some(entry)
            }
            None => {
                notices.push(Notice::Missed(key.clone()));
                None
            }
        };
        self.emit(notices);
        result
    }

    /// Store `payload` under `key`, evicting least recently used entries
    /// until the new entry fits.
    pub fn insert(&self, key: CacheKey, payload: impl Into<Bytes>, metadata: EntryMetadata) -> InsertOutcome {
        if !self.is_enabled() {
            return InsertOutcome::Rejected(CacheError::Disabled);
        }
        let payload = payload.into();
        let size = payload.len() as u64;
        if let Some(error) = self.admission_error(size) {
            warn!(cache = %self.name, %key, size, %error, "cache insert rejected");
            self.emit(vec![Notice::Error(key, error)]);
            return InsertOutcome::Rejected(error);
        }

        let entry = Arc::new(CacheEntry::new(key.clone(), payload, metadata, self.tick()));
        let mut notices = Vec::new();
        let outcome = {
            let mut heap = lock(&self.heap_bytes);
            let previous = self.entries.get(&key).map(|e| Arc::clone(e.value()));
            let reclaimed = previous.as_ref().map_or(0, |p| p.size());
            let extra_entry = usize::from(previous.is_none());
            while *heap - reclaimed + size > self.config.max_heap_bytes
                || self.entries.len() + extra_entry > self.config.max_entries
            {
                let Some(victim) = self.least_recent(&key) else {
                    break;
                };
                if self.entries.remove_if(victim.key(), |_, e| Arc::ptr_eq(e, &victim)).is_some() {
                    *heap -= victim.size();
                    debug!(cache = %self.name, key = %victim.key(), "cache entry evicted");
                    notices.push(Notice::Removed(victim));
                }
            }
            *heap = *heap - reclaimed + size;
            self.entries.insert(key, Arc::clone(&entry));
            metrics::set_cache_heap_bytes(&self.name, *heap);
            if previous.is_some() {
                notices.push(Notice::Updated(entry));
                InsertOutcome::Updated
            } else {
                notices.push(Notice::Added(entry));
                InsertOutcome::Added
            }
        };
        self.emit(notices);
        outcome
    }

    /// Remove `key`. Returns whether an entry was resident.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        let removed = {
            let mut heap = lock(&self.heap_bytes);
            let removed = self.entries.remove(key).map(|(_, e)| e);
            if let Some(entry) = &removed {
                *heap -= entry.size();
                metrics::set_cache_heap_bytes(&self.name, *heap);
            }
            removed
        };
        match removed {
            Some(entry) => {
                debug!(cache = %self.name, %key, "cache entry invalidated");
                self.emit(vec![Notice::Removed(entry)]);
                true
            }
            None => false,
        }
    }

    /// Remove every entry.
    pub fn clear(&self) {
        let removed: Vec<Arc<CacheEntry>> = {
            let mut heap = lock(&self.heap_bytes);
            let keys: Vec<CacheKey> = self.entries.iter().map(|e| e.key().clone()).collect();
            let removed: Vec<_> = keys
                .iter()
                .filter_map(|k| self.entries.remove(k).map(|(_, e)| e))
                .collect();
            *heap = 0;
            metrics::set_cache_heap_bytes(&self.name, 0);
            removed
        };
        debug!(cache = %self.name, count = removed.len(), "cache cleared");
        self.emit(removed.into_iter().map(Notice::Removed).collect());
    }

    /// Number of resident entries.
    #[must_use]
    pub fn len(&self) -> usize { self.entries.len() }

    /// Whether no entry is resident.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Sum of resident payload sizes.
    #[must_use]
    pub fn heap_bytes(&self) -> u64 { *lock(&self.heap_bytes) }

    /// Snapshot the counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let heap_bytes = *lock(&self.heap_bytes);
        CacheStats {
            enabled: self.is_enabled(),
            max_entry_size: self.config.max_entry_size,
            entries: self.entries.len(),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            updates: self.counters.updates.load(Ordering::Relaxed),
            additions: self.counters.additions.load(Ordering::Relaxed),
            removals: self.counters.removals.load(Ordering::Relaxed),
            heap_bytes,
        }
    }

    /// Age after which entries expire.
    #[must_use]
    pub fn max_age(&self) -> Option<Duration> { self.config.max_age }

    fn admission_error(&self, size: u64) -> Option<CacheError> {
        if self.config.max_entries == 0 {
            Some(CacheError::NoCapacity)
        } else if size > self.config.max_entry_size as u64 {
            Some(CacheError::EntryTooLarge {
                size,
                max: self.config.max_entry_size,
            })
        } else if size > self.config.max_heap_bytes {
            Some(CacheError::ExceedsHeap {
                size,
                budget: self.config.max_heap_bytes,
            })
        } else {
            None
        }
    }

    fn tick(&self) -> u64 { self.clock.fetch_add(1, Ordering::Relaxed) }

    // Linear scan; only runs under the structure lock when room is needed.
    fn least_recent(&self, except: &CacheKey) -> Option<Arc<CacheEntry>> {
        self.entries
            .iter()
            .filter(|e| e.key() != except)
            .min_by_key(|e| e.value().last_access())
            .map(|e| Arc::clone(e.value()))
    }

    fn remove_exact(&self, entry: &Arc<CacheEntry>) -> Option<Arc<CacheEntry>> {
        let mut heap = lock(&self.heap_bytes);
        let (_, removed) = self
            .entries
            .remove_if(entry.key(), |_, e| Arc::ptr_eq(e, entry))?;
        *heap -= removed.size();
        metrics::set_cache_heap_bytes(&self.name, *heap);
        Some(removed)
    }

    fn emit(&self, notices: Vec<Notice>) {
        if notices.is_empty() {
            return;
        }
        let probes = self
            .probes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for notice in notices {
            self.counters.record(&notice);
            metrics::inc_cache_event(notice.event());
            for probe in &probes {
                match &notice {
                    Notice::Added(e) => probe.on_added(e),
                    Notice::Removed(e) => probe.on_removed(e),
                    Notice::Hit(e) => probe.on_hit(e),
                    Notice::Missed(k) => probe.on_missed(k),
                    Notice::Updated(e) => probe.on_updated(e),
                    Notice::Error(k, err) => probe.on_error(k, err),
                }
            }
        }
    }
}

impl MonitoringView for ResourceCache {
    fn snapshot(&self) -> MonitoringSnapshot {
        let stats = self.stats();
        MonitoringSnapshot::new("cache")
            .with("name", self.name.as_str())
            .with("enabled", stats.enabled)
            .with("max-entry-size", stats.max_entry_size)
            .with("max-heap-bytes", self.config.max_heap_bytes)
            .with("entries", stats.entries)
            .with("hits", stats.hits)
            .with("misses", stats.misses)
            .with("errors", stats.errors)
            .with("updates", stats.updates)
            .with("heap-bytes", stats.heap_bytes)
    }
}

impl std::fmt::Debug for ResourceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceCache")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
