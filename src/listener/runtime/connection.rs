//! Per-connection driver.

use std::{
    io,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use bytes::BytesMut;
use futures::FutureExt;
use log::error;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    net::TcpStream,
    select,
    time::timeout,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, warn};

use crate::{
    connection::{CloseReason, Connection, ConnectionId, ConnectionRegistry},
    keep_alive::KeepAlive,
    listener::ListenerComposer,
    pipeline::{IoEvent, Message, Outcome, Pipeline, PipelineError, Suspension},
    transport::Transport,
    write_queue::WriteQueueConfig,
};

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Shared by every connection of one listener.
pub(in crate::listener) struct ConnectionServices {
    pub composer: Arc<ListenerComposer>,
    pub connections: Arc<ConnectionRegistry>,
    pub write_queue: WriteQueueConfig,
    pub idle_timeout: Option<Duration>,
    pub transport: Arc<dyn Transport>,
    pub next_id: AtomicU64,
}

impl ConnectionServices {
    fn next_id(&self) -> ConnectionId { ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed)) }
}

/// Spawn a task driving one TCP connection, logging and discarding any
/// panics.
pub(super) fn spawn_connection_task(
    stream: TcpStream,
    peer: SocketAddr,
    services: Arc<ConnectionServices>,
    shutdown: CancellationToken,
    tracker: &TaskTracker,
) {
    tracker.spawn(async move {
        let fut = std::panic::AssertUnwindSafe(process_stream(stream, peer, services, shutdown)).catch_unwind();

        if let Err(panic) = fut.await {
            crate::metrics::inc_connection_panics();
            let panic_msg = crate::panic::format_panic(panic);
            // Emit via both `log` and `tracing` for tests that capture either.
            error!("connection task panicked: panic={panic_msg}, peer_addr={peer:?}");
            tracing::error!(panic = %panic_msg, ?peer, "connection task panicked");
        }
    });
}

async fn process_stream(stream: TcpStream, peer: SocketAddr, services: Arc<ConnectionServices>, shutdown: CancellationToken) {
    let set = services.composer.current();
    let transport = set
        .transport
        .clone()
        .unwrap_or_else(|| Arc::clone(&services.transport));
    if let Err(e) = transport.configure(&stream) {
        warn!(%peer, error = %e, "failed to configure socket");
    }
    let idle_timeout = set
        .keep_alive
        .as_ref()
        .and_then(|policy| policy.idle_timeout())
        .or(services.idle_timeout);

    let pipeline = Arc::new(services.composer.pipeline());
    let connection = Arc::new(Connection::new(services.next_id(), pipeline, services.write_queue).with_peer(peer));
    services.connections.insert(&connection);
    debug!(connection = %connection.id(), %peer, "connection accepted");

    let (reader, mut writer) = stream.into_split();
    let driver = Driver {
        connection: &connection,
        transport: transport.as_ref(),
        keep_alive: set.keep_alive.as_deref(),
        idle_timeout,
    };
    let reason = driver.run(reader, &mut writer, &shutdown).await;

    connection.close(reason);
    if let Err(e) = connection.fire(IoEvent::Close(reason), None) {
        debug!(connection = %connection.id(), error = %e, "close event failed");
    }
    services.connections.remove(&connection.id());
}

/// Moves bytes between one socket and its connection.
pub(in crate::listener) struct Driver<'a> {
    pub connection: &'a Connection,
    pub transport: &'a dyn Transport,
    pub keep_alive: Option<&'a KeepAlive>,
    pub idle_timeout: Option<Duration>,
}

impl Driver<'_> {
    /// Run until the connection should close and return why.
    ///
    /// Stage failures fire an [`IoEvent::Error`] before the connection is
    /// closed. A close requested by a stage is honoured once the queued
    /// writes have been flushed.
    #[expect(
        clippy::integer_division_remainder_used,
        reason = "tokio::select! expands to modulus internally"
    )]
    pub async fn run<R, W>(&self, mut reader: R, writer: &mut W, shutdown: &CancellationToken) -> CloseReason
    where
        R: AsyncRead + Unpin,
        W: tokio::io::AsyncWrite + Send + Unpin,
    {
        let mut suspended: Option<Suspension> = None;
        if let Err(reason) = self.dispatch(IoEvent::Accept, None, &mut suspended) {
            return reason;
        }
        let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
        loop {
            if let Some(reason) = self.connection.close_requested() {
                return match self.flush(writer).await {
                    Ok(()) => reason,
                    Err(failed) => failed,
                };
            }
            let queue = self.connection.write_queue();
            select! {
                biased;

                () = shutdown.cancelled() => return CloseReason::Shutdown,
                ready = queue.ready() => {
                    if !ready {
                        return queue.close_reason().unwrap_or(CloseReason::Local);
                    }
                    if let Err(reason) = self.flush(writer).await {
                        return reason;
                    }
                }
                read = read_within(&mut reader, &mut buf, self.idle_timeout) => match read {
                    None => {
                        if let Some(policy) = self.keep_alive {
                            policy.record_timeout();
                        }
                        return CloseReason::IdleTimeout;
                    }
                    Some(Ok(0)) => return CloseReason::Remote,
                    Some(Ok(_)) => {
                        let data = buf.split().freeze();
                        if let Err(reason) = self.deliver(data, &mut suspended) {
                            return reason;
                        }
                    }
                    Some(Err(e)) => {
                        let _ = self.dispatch(IoEvent::Error(Arc::new(e)), None, &mut suspended);
                        return CloseReason::Remote;
                    }
                },
            }
        }
    }

    fn deliver(&self, data: bytes::Bytes, suspended: &mut Option<Suspension>) -> Result<(), CloseReason> {
        if let Some(waiting) = suspended.take() {
            let outcome = Pipeline::resume(waiting, self.connection);
            self.settle(outcome, false, suspended)?;
        }
        self.dispatch(IoEvent::Read, Some(Box::new(data)), suspended)
    }

    fn dispatch(
        &self,
        event: IoEvent,
        message: Option<Message>,
        suspended: &mut Option<Suspension>,
    ) -> Result<(), CloseReason> {
        let is_error = event.is_error();
        let outcome = self.connection.fire(event, message);
        self.settle(outcome, is_error, suspended)
    }

    fn settle(
        &self,
        outcome: Result<Outcome, PipelineError>,
        was_error: bool,
        suspended: &mut Option<Suspension>,
    ) -> Result<(), CloseReason> {
        match outcome {
            Ok(Outcome::Suspended(waiting)) => {
                *suspended = Some(waiting);
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(PipelineError::Closed(_)) => Err(CloseReason::Local),
            Err(err) => {
                if !was_error {
                    let event = IoEvent::Error(Arc::new(io::Error::other(err)));
                    if let Err(e) = self.connection.fire(event, None) {
                        debug!(connection = %self.connection.id(), error = %e, "error event failed");
                    }
                }
                Err(CloseReason::StageFailure)
            }
        }
    }

    async fn flush<W>(&self, writer: &mut W) -> Result<(), CloseReason>
    where
        W: tokio::io::AsyncWrite + Send + Unpin,
    {
        match self.transport.flush(self.connection.write_queue(), writer).await {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(connection = %self.connection.id(), error = %e, "write failed");
                Err(CloseReason::WriteFailure)
            }
        }
    }
}

/// Read into `buf`, giving up after `idle`. `None` means the timeout
/// elapsed.
async fn read_within<R>(reader: &mut R, buf: &mut BytesMut, idle: Option<Duration>) -> Option<io::Result<usize>>
where
    R: AsyncRead + Unpin,
{
    buf.reserve(READ_BUFFER_SIZE);
    match idle {
        Some(limit) => timeout(limit, reader.read_buf(buf)).await.ok(),
        None => Some(reader.read_buf(buf).await),
    }
}
