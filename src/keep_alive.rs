//! Persistent-connection policy.
//!
//! [`KeepAlive`] is both a pipeline stage and the source of the idle timeout
//! enforced by the listener runtime. It counts requests per connection and
//! asks for the connection to be closed once the configured maximum is
//! reached.

use std::{
    sync::{
        OnceLock,
        atomic::{AtomicU32, AtomicU64, Ordering},
    },
    time::Duration,
};

use serde::Deserialize;
use tracing::debug;

use crate::{
    attributes::Attribute,
    connection::CloseReason,
    monitoring::{MonitoringSnapshot, MonitoringView},
    pipeline::{IoEvent, Stage, StageAction, StageContext, StageError},
};

/// Default number of requests served on one connection.
pub const DEFAULT_MAX_REQUESTS: u32 = 256;
/// Default idle timeout.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Keep-alive limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct KeepAliveConfig {
    /// Requests served before the connection is closed. `None` means no
    /// limit.
    pub max_requests: Option<u32>,
    /// Idle period after which the connection is closed, in seconds.
    /// `None` disables the timeout.
    pub idle_timeout_secs: Option<u64>,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            max_requests: Some(DEFAULT_MAX_REQUESTS),
            idle_timeout_secs: Some(DEFAULT_IDLE_TIMEOUT.as_secs()),
        }
    }
}

impl KeepAliveConfig {
    /// Limit the number of requests per connection.
    #[must_use]
    pub fn max_requests(mut self, max: Option<u32>) -> Self {
        self.max_requests = max;
        self
    }

    /// Set the idle timeout.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout_secs = timeout.map(|t| t.as_secs());
        self
    }
}

fn requests_served() -> &'static Attribute<AtomicU32> {
    static SERVED: OnceLock<Attribute<AtomicU32>> = OnceLock::new();
    SERVED.get_or_init(|| Attribute::with_default("wireline.keep-alive.requests", || AtomicU32::new(0)))
}

/// Keep-alive counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KeepAliveStats {
    /// Requests served on an already used connection.
    pub hits: u64,
    /// Connections closed because they reached the request limit.
    pub refusals: u64,
    /// Connections closed by the idle timeout.
    pub timeouts: u64,
}

/// Keep-alive policy shared by every connection of a listener.
#[derive(Debug, Default)]
pub struct KeepAlive {
    config: KeepAliveConfig,
    hits: AtomicU64,
    refusals: AtomicU64,
    timeouts: AtomicU64,
}

impl KeepAlive {
    /// Create a policy.
    #[must_use]
    pub fn new(config: KeepAliveConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Configured limits.
    #[must_use]
    pub fn config(&self) -> &KeepAliveConfig { &self.config }

    /// Idle period after which connections are closed.
    #[must_use]
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.config.idle_timeout_secs.map(Duration::from_secs)
    }

    /// Count a connection closed for idleness.
    pub fn record_timeout(&self) { self.timeouts.fetch_add(1, Ordering::Relaxed); }

    /// Snapshot the counters.
    #[must_use]
    pub fn stats(&self) -> KeepAliveStats {
        KeepAliveStats {
            hits: self.hits.load(Ordering::Relaxed),
            refusals: self.refusals.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}

impl Stage for KeepAlive {
    fn name(&self) -> &str { "keep-alive" }

    fn handle(&self, ctx: &mut StageContext<'_>) -> Result<StageAction, StageError> {
        if !matches!(ctx.event(), IoEvent::Read) {
            return Ok(StageAction::Continue);
        }
        let Some(served) = ctx.attributes().get(requests_served()) else {
            return Ok(StageAction::Continue);
        };
        let count = served.fetch_add(1, Ordering::Relaxed) + 1;
        if count > 1 {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        if self.config.max_requests.is_some_and(|max| count >= max) {
            self.refusals.fetch_add(1, Ordering::Relaxed);
            debug!(connection = %ctx.connection().id(), count, "request limit reached");
            ctx.request_close(CloseReason::Local);
        }
        Ok(StageAction::Continue)
    }
}

impl MonitoringView for KeepAlive {
    fn snapshot(&self) -> MonitoringSnapshot {
        let stats = self.stats();
        let mut snapshot = MonitoringSnapshot::new("keep-alive")
            .with("hits", stats.hits)
            .with("refusals", stats.refusals)
            .with("timeouts", stats.timeouts);
        if let Some(max) = self.config.max_requests {
            snapshot = snapshot.with("max-requests", max);
        }
        if let Some(secs) = self.config.idle_timeout_secs {
            snapshot = snapshot.with("idle-timeout-seconds", secs);
        }
        snapshot
    }
}
