//! Listener configuration and runtime flags.

use std::{
    num::NonZeroUsize,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use serde::Deserialize;
use tokio::sync::Notify;

use crate::write_queue::WriteQueueConfig;

/// Default port.
pub const DEFAULT_PORT: u16 = 8080;
/// Default largest request header accepted, in bytes.
pub const DEFAULT_MAX_HEADER_SIZE: usize = 8192;
/// Default idle timeout in seconds.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 30;

/// Static description of a network listener.
///
/// Values come from external configuration and are read-only once the
/// listener is built.
///
/// # Examples
///
/// ```
/// use wireline::listener::ListenerConfig;
///
/// let config = ListenerConfig::new("admin")
///     .host("127.0.0.1")
///     .port(4848)
///     .max_pending_bytes(Some(64 * 1024));
/// assert_eq!(config.address(), "127.0.0.1:4848");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Listener name, used as the monitoring scope.
    pub name: String,
    /// Host or address to bind.
    pub host: String,
    /// Port to bind. Zero picks an ephemeral port.
    pub port: u16,
    /// Whether the listener carries TLS traffic.
    pub secure: bool,
    /// Idle period after which connections are closed, in seconds.
    pub idle_timeout_secs: Option<u64>,
    /// Largest request header accepted, in bytes.
    pub max_header_size: usize,
    /// Outstanding bytes per connection before producers are told to back
    /// off. `None` means unlimited.
    pub max_pending_bytes: Option<usize>,
    /// Whether chunked transfer coding is allowed.
    pub chunking_enabled: bool,
    /// Name of the protocol whose codec stage the listener starts with.
    pub protocol: Option<String>,
    /// Number of accept loops.
    pub workers: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            name: "default".to_owned(),
            host: "0.0.0.0".to_owned(),
            port: DEFAULT_PORT,
            secure: false,
            idle_timeout_secs: Some(DEFAULT_IDLE_TIMEOUT_SECS),
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
            max_pending_bytes: None,
            chunking_enabled: true,
            protocol: None,
            workers: std::thread::available_parallelism().map_or(1, NonZeroUsize::get),
        }
    }
}

impl ListenerConfig {
    /// Default configuration named `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the bind host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the bind port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Mark the listener as secure.
    #[must_use]
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Set the idle timeout.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout_secs = timeout.map(|t| t.as_secs());
        self
    }

    /// Set the largest accepted header.
    #[must_use]
    pub fn max_header_size(mut self, bytes: usize) -> Self {
        self.max_header_size = bytes;
        self
    }

    /// Set the per-connection pending byte limit.
    #[must_use]
    pub fn max_pending_bytes(mut self, bytes: Option<usize>) -> Self {
        self.max_pending_bytes = bytes;
        self
    }

    /// Allow or forbid chunked transfer coding.
    #[must_use]
    pub fn chunking_enabled(mut self, enabled: bool) -> Self {
        self.chunking_enabled = enabled;
        self
    }

    /// Select the initial protocol.
    #[must_use]
    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    /// Set the number of accept loops. Values below one are raised to one.
    #[must_use]
    pub fn workers(mut self, count: usize) -> Self {
        self.workers = count.max(1);
        self
    }

    /// `host:port` string used for binding.
    #[must_use]
    pub fn address(&self) -> String { format!("{}:{}", self.host, self.port) }

    /// Idle timeout as a [`Duration`].
    #[must_use]
    pub fn idle_timeout_duration(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }

    /// Write queue settings for connections accepted by this listener.
    #[must_use]
    pub fn write_queue_config(&self) -> WriteQueueConfig {
        WriteQueueConfig::default().max_pending_bytes(self.max_pending_bytes)
    }
}

/// Started and paused flags of a running listener.
///
/// While paused the accept loops stop taking new connections; established
/// connections are unaffected.
#[derive(Debug, Default)]
pub struct ListenerState {
    started: AtomicBool,
    paused: AtomicBool,
    resumed: Notify,
}

impl ListenerState {
    /// Whether the accept loops are running.
    #[must_use]
    pub fn is_started(&self) -> bool { self.started.load(Ordering::Acquire) }

    /// Whether accepting is paused.
    #[must_use]
    pub fn is_paused(&self) -> bool { self.paused.load(Ordering::Acquire) }

    /// Stop accepting new connections.
    pub fn pause(&self) { self.paused.store(true, Ordering::Release); }

    /// Resume accepting new connections.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
        self.resumed.notify_waiters();
    }

    pub(crate) fn set_started(&self, started: bool) { self.started.store(started, Ordering::Release); }

    /// Wait until the listener is not paused.
    pub(crate) async fn wait_resumed(&self) {
        loop {
            let notified = self.resumed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.is_paused() {
                return;
            }
            notified.await;
        }
    }
}
