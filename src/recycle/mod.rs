//! Recycling support for short-lived, high-churn objects.
//!
//! [`RecyclePool`] keeps a bounded free list and [`Lifecycle`] guards each
//! pooled object so late access through a stale handle fails fast with a
//! [`RecycleError`]. Release-site capture is opt-in through
//! [`PoolConfig::track_recycling`].

mod lifecycle;
mod pool;

pub use lifecycle::{Lifecycle, RecycleError, ReleaseSite};
pub use pool::{DEFAULT_MAX_IDLE, PoolConfig, PoolStats, Recyclable, RecyclePool};
