//! Cached resources and their keys.

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant, SystemTime},
};

use bytes::Bytes;

/// Identity of a cached resource: the request host and path.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    host: Option<String>,
    path: String,
}

impl CacheKey {
    /// Key for `path` on `host`.
    #[must_use]
    pub fn new(host: Option<&str>, path: &str) -> Self {
        Self {
            host: host.map(str::to_ascii_lowercase),
            path: path.to_owned(),
        }
    }

    /// Key for `path` regardless of host.
    #[must_use]
    pub fn path(path: &str) -> Self { Self::new(None, path) }

    /// Host component, lowercased.
    #[must_use]
    pub fn host(&self) -> Option<&str> { self.host.as_deref() }

    /// Path component.
    #[must_use]
    pub fn resource(&self) -> &str { &self.path }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.host {
            Some(host) => write!(f, "{host}{}", self.path),
            None => f.write_str(&self.path),
        }
    }
}

/// Validity metadata stored alongside a payload.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EntryMetadata {
    /// Modification time of the underlying resource.
    pub last_modified: Option<SystemTime>,
    /// Entity tag of the underlying resource.
    pub etag: Option<String>,
    /// Media type of the payload.
    pub content_type: Option<String>,
}

impl EntryMetadata {
    /// Set the modification time.
    #[must_use]
    pub fn last_modified(mut self, at: SystemTime) -> Self {
        self.last_modified = Some(at);
        self
    }

    /// Set the entity tag.
    #[must_use]
    pub fn etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    /// Set the media type.
    #[must_use]
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// One resident resource.
///
/// Entries are fully built before they are published, and never change
/// afterwards apart from their recency stamp.
#[derive(Debug)]
pub struct CacheEntry {
    key: CacheKey,
    payload: Bytes,
    metadata: EntryMetadata,
    inserted_at: Instant,
    last_access: AtomicU64,
}

impl CacheEntry {
    pub(super) fn new(key: CacheKey, payload: Bytes, metadata: EntryMetadata, tick: u64) -> Self {
        Self {
            key,
            payload,
            metadata,
            inserted_at: Instant::now(),
            last_access: AtomicU64::new(tick),
        }
    }

    /// Key the entry is stored under.
    #[must_use]
    pub fn key(&self) -> &CacheKey { &self.key }

    /// Cached payload.
    #[must_use]
    pub fn payload(&self) -> &Bytes { &self.payload }

    /// Validity metadata.
    #[must_use]
    pub fn metadata(&self) -> &EntryMetadata { &self.metadata }

    /// Payload size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 { self.payload.len() as u64 }

    /// Time since the entry was inserted.
    #[must_use]
    pub fn age(&self) -> Duration { self.inserted_at.elapsed() }

    pub(super) fn is_expired(&self, max_age: Option<Duration>) -> bool {
        max_age.is_some_and(|max| self.age() >= max)
    }

    pub(super) fn touch(&self, tick: u64) { self.last_access.store(tick, Ordering::Relaxed); }

    pub(super) fn last_access(&self) -> u64 { self.last_access.load(Ordering::Relaxed) }
}
