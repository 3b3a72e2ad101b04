//! Byte transports that carry a connection's write queue to the wire.

use std::{
    io,
    sync::atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::{io::AsyncWrite, net::TcpStream};

use crate::{
    monitoring::MonitoringSnapshot,
    write_queue::{Flushed, WriteQueue},
};

/// Strategy for moving queued writes onto a stream.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Name used in logs and monitoring.
    fn name(&self) -> &str;

    /// Apply socket options to a freshly accepted stream.
    ///
    /// # Errors
    ///
    /// Returns the error reported by the socket.
    fn configure(&self, stream: &TcpStream) -> io::Result<()> {
        let _ = stream;
        Ok(())
    }

    /// Transmit every record currently queued on `queue`.
    ///
    /// # Errors
    ///
    /// Returns the I/O error that interrupted transmission. The failed
    /// record has already been completed with that error.
    async fn flush(
        &self,
        queue: &WriteQueue,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> io::Result<Flushed>;

    /// Current monitoring attributes.
    fn snapshot(&self) -> MonitoringSnapshot;
}

/// Socket options for [`TcpTransport`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TcpTransportConfig {
    /// Disable Nagle's algorithm.
    pub nodelay: bool,
}

impl Default for TcpTransportConfig {
    fn default() -> Self { Self { nodelay: true } }
}

/// Counters kept by [`TcpTransport`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Records transmitted.
    pub writes: u64,
    /// Bytes transmitted.
    pub bytes_written: u64,
    /// Flushes interrupted by an I/O error.
    pub failures: u64,
}

/// Plain TCP transport.
#[derive(Debug, Default)]
pub struct TcpTransport {
    config: TcpTransportConfig,
    writes: AtomicU64,
    bytes_written: AtomicU64,
    failures: AtomicU64,
}

impl TcpTransport {
    /// Create a transport applying `config` to every stream.
    #[must_use]
    pub fn new(config: TcpTransportConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Configured socket options.
    #[must_use]
    pub fn config(&self) -> &TcpTransportConfig { &self.config }

    /// Snapshot the counters.
    #[must_use]
    pub fn stats(&self) -> TransportStats {
        TransportStats {
            writes: self.writes.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn name(&self) -> &str { "tcp" }

    fn configure(&self, stream: &TcpStream) -> io::Result<()> { stream.set_nodelay(self.config.nodelay) }

    async fn flush(
        &self,
        queue: &WriteQueue,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> io::Result<Flushed> {
        let flushed = queue.flush_to(writer).await.map_err(io::Error::other)?;
        self.writes
            .fetch_add(flushed.records as u64, Ordering::Relaxed);
        self.bytes_written
            .fetch_add(flushed.bytes as u64, Ordering::Relaxed);
        match flushed.failure {
            Some(kind) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                Err(io::Error::from(kind))
            }
            None => Ok(flushed),
        }
    }

    fn snapshot(&self) -> MonitoringSnapshot {
        let stats = self.stats();
        MonitoringSnapshot::new("transport")
            .with("name", self.name())
            .with("nodelay", self.config.nodelay)
            .with("writes", stats.writes)
            .with("bytes-written", stats.bytes_written)
            .with("failures", stats.failures)
    }
}
