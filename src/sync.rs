//! Synchronisation primitives shared by the queue and pool internals.
//!
//! Under `cfg(loom)` the primitives come from `loom` so model tests can
//! explore interleavings; otherwise they are the standard library types.

#[cfg(not(loom))]
pub(crate) use std::sync::{
    Mutex,
    MutexGuard,
    atomic::{AtomicBool, AtomicU64, Ordering},
};
use std::sync::PoisonError;

#[cfg(loom)]
pub(crate) use loom::sync::{
    Mutex,
    MutexGuard,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

/// Acquire `mutex`, recovering the guard if a previous holder panicked.
///
/// Every critical section in this crate leaves its state consistent before
/// invoking user callbacks, so a poisoned lock carries no torn state.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
