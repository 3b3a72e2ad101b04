//! Active connection counting and RAII guard.

use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide count of open [`Connection`](super::Connection) values.
static ACTIVE_CONNECTIONS: AtomicU64 = AtomicU64::new(0);

/// Guard held by each connection. It increments [`ACTIVE_CONNECTIONS`]
/// on creation and decrements it on drop.
pub(super) struct ActiveConnection;

impl ActiveConnection {
    pub(super) fn new() -> Self {
        ACTIVE_CONNECTIONS.fetch_add(1, Ordering::Relaxed);
        crate::metrics::inc_connections();
        Self
    }
}

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        ACTIVE_CONNECTIONS.fetch_sub(1, Ordering::Relaxed);
        crate::metrics::dec_connections();
    }
}

/// Number of connection values currently alive in this process.
#[must_use]
pub fn active_connection_count() -> u64 { ACTIVE_CONNECTIONS.load(Ordering::Relaxed) }
