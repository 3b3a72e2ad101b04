//! Bounded, monitored cache of static resources.
//!
//! [`ResourceCache`] keeps fully built [`CacheEntry`] values keyed by host
//! and path, enforces entry size, entry count, heap and age limits, and
//! reports every event to registered [`CacheProbe`]s. [`CacheStage`] plugs
//! the cache into a connection pipeline.

mod config;
mod entry;
mod probe;
mod stage;
mod store;

pub use config::{CacheConfig, DEFAULT_MAX_ENTRIES, DEFAULT_MAX_ENTRY_SIZE, DEFAULT_MAX_HEAP_BYTES};
pub use entry::{CacheEntry, CacheKey, EntryMetadata};
pub use probe::{CacheError, CacheProbe};
pub use stage::{CacheStage, request_key};
pub use store::{CacheStats, InsertOutcome, ResourceCache};
