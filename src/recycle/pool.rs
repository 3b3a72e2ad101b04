//! Bounded free list for recyclable objects.

use std::panic::Location;

use serde::Deserialize;
use tracing::trace;

use super::{RecycleError, ReleaseSite};
use crate::sync::{AtomicU64, Mutex, Ordering, lock};

/// Default number of idle objects retained by a pool.
pub const DEFAULT_MAX_IDLE: usize = 64;

/// Objects that can be handed out repeatedly by a [`RecyclePool`].
///
/// Implementations usually embed a [`Lifecycle`](super::Lifecycle) and
/// forward to it.
pub trait Recyclable {
    /// Prepare the object for a new logical use and return its generation.
    fn activate(&mut self, track: bool) -> u64;

    /// Invalidate outstanding handles and reset every field.
    ///
    /// # Errors
    ///
    /// Returns [`RecycleError::DoubleRelease`] if the object was already
    /// released.
    fn recycle(&mut self, site: ReleaseSite) -> Result<(), RecycleError>;
}

/// Pool settings.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of idle objects kept for reuse.
    pub max_idle: usize,
    /// Capture the release site of each object to enrich
    /// use-after-recycle diagnostics.
    pub track_recycling: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle: DEFAULT_MAX_IDLE,
            track_recycling: false,
        }
    }
}

/// Point-in-time pool counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Objects constructed because the free list was empty.
    pub allocated: u64,
    /// Objects drawn from the free list.
    pub reused: u64,
    /// Objects handed back through [`RecyclePool::release`].
    pub released: u64,
    /// Released objects dropped because the free list was full.
    pub discarded: u64,
    /// Objects currently idle.
    pub idle: usize,
}

type Factory<T> = Box<dyn Fn() -> T + Send + Sync>;

/// Free list of [`Recyclable`] objects.
///
/// The pool only guarantees that objects it hands out have been reset. It
/// cannot stop a caller from touching an object after releasing it; the
/// generation check on the object itself reports that misuse.
pub struct RecyclePool<T> {
    idle: Mutex<Vec<T>>,
    factory: Factory<T>,
    config: PoolConfig,
    allocated: AtomicU64,
    reused: AtomicU64,
    released: AtomicU64,
    discarded: AtomicU64,
}

impl<T: Recyclable> RecyclePool<T> {
    /// Create a pool that builds new objects with `factory`.
    pub fn new<F>(config: PoolConfig, factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            idle: Mutex::new(Vec::with_capacity(config.max_idle.min(DEFAULT_MAX_IDLE))),
            factory: Box::new(factory),
            config,
            allocated: AtomicU64::new(0),
            reused: AtomicU64::new(0),
            released: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    /// Return a ready-to-use object together with its generation.
    pub fn acquire(&self) -> (T, u64) {
        let pooled = lock(&self.idle).pop();
        let mut obj = if let Some(obj) = pooled {
            self.reused.fetch_add(1, Ordering::Relaxed);
            obj
        } else {
            self.allocated.fetch_add(1, Ordering::Relaxed);
            (self.factory)()
        };
        let generation = obj.activate(self.config.track_recycling);
        trace!(generation, "pooled object acquired");
        (obj, generation)
    }

    /// Reset `obj` and keep it for reuse if the free list has room.
    ///
    /// The caller must guarantee no other path still uses the object.
    ///
    /// # Errors
    ///
    /// Returns [`RecycleError::DoubleRelease`] if `obj` was already released;
    /// the object is not pooled again in that case.
    #[track_caller]
    pub fn release(&self, mut obj: T) -> Result<(), RecycleError> {
        obj.recycle(Location::caller())?;
        self.released.fetch_add(1, Ordering::Relaxed);
        let mut idle = lock(&self.idle);
        if idle.len() < self.config.max_idle {
            idle.push(obj);
        } else {
            drop(idle);
            self.discarded.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Configuration the pool was built with.
    #[must_use]
    pub fn config(&self) -> PoolConfig { self.config }

    /// Snapshot the pool counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocated: self.allocated.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            idle: lock(&self.idle).len(),
        }
    }
}

impl<T> std::fmt::Debug for RecyclePool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecyclePool")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
