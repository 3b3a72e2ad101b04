//! Resource cache configuration.

use std::time::Duration;

use serde::Deserialize;
use static_assertions::const_assert;

/// Default upper bound on a single entry, in bytes.
pub const DEFAULT_MAX_ENTRY_SIZE: usize = 1024 * 1024;
/// Default budget for all resident payloads, in bytes.
pub const DEFAULT_MAX_HEAP_BYTES: u64 = 10 * 1024 * 1024;
/// Default maximum number of resident entries.
pub const DEFAULT_MAX_ENTRIES: usize = 1024;

const_assert!(DEFAULT_MAX_ENTRY_SIZE as u64 <= DEFAULT_MAX_HEAP_BYTES);

/// Limits applied by a [`ResourceCache`](super::ResourceCache).
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use wireline::cache::CacheConfig;
///
/// let config = CacheConfig::default()
///     .max_entry_size(5 * 1024 * 1024)
///     .max_age(Some(Duration::from_secs(30)));
/// assert!(config.enabled);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether lookups and inserts are served at all.
    pub enabled: bool,
    /// Largest payload accepted by `insert`.
    pub max_entry_size: usize,
    /// Budget for the sum of resident payload sizes.
    pub max_heap_bytes: u64,
    /// Maximum number of resident entries; `0` rejects every insert.
    pub max_entries: usize,
    /// Entries older than this are treated as absent.
    #[serde(with = "max_age_secs")]
    pub max_age: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entry_size: DEFAULT_MAX_ENTRY_SIZE,
            max_heap_bytes: DEFAULT_MAX_HEAP_BYTES,
            max_entries: DEFAULT_MAX_ENTRIES,
            max_age: None,
        }
    }
}

impl CacheConfig {
    /// Enable or disable the cache.
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the largest payload accepted.
    #[must_use]
    pub fn max_entry_size(mut self, bytes: usize) -> Self {
        self.max_entry_size = bytes;
        self
    }

    /// Set the resident byte budget.
    #[must_use]
    pub fn max_heap_bytes(mut self, bytes: u64) -> Self {
        self.max_heap_bytes = bytes;
        self
    }

    /// Set the maximum number of entries. With `0` every insert is
    /// rejected with [`CacheError::NoCapacity`](super::CacheError::NoCapacity).
    #[must_use]
    pub fn max_entries(mut self, entries: usize) -> Self {
        self.max_entries = entries;
        self
    }

    /// Set the age after which entries expire.
    #[must_use]
    pub fn max_age(mut self, age: Option<Duration>) -> Self {
        self.max_age = age;
        self
    }
}

// Configuration files express the age in whole seconds.
mod max_age_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_secs))
    }
}
