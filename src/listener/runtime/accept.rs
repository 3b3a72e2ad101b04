//! Accept loops.

use std::{io, net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use log::warn;
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    time::{Duration, sleep},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::{
    backoff::BackoffConfig,
    connection::{ConnectionServices, spawn_connection_task},
};
use crate::listener::ListenerState;

/// Source of incoming connections consumed by the accept loop.
///
/// Implementations must be cancellation-safe: dropping a pending `accept()`
/// future must not leak resources.
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub(in crate::listener) trait AcceptListener: Send + Sync {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)>;
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl AcceptListener for TcpListener {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> { TcpListener::accept(self).await }

    fn local_addr(&self) -> io::Result<SocketAddr> { TcpListener::local_addr(self) }
}

#[derive(Debug)]
pub(in crate::listener) struct AcceptLoopOptions {
    pub state: Arc<ListenerState>,
    pub shutdown: CancellationToken,
    pub tracker: TaskTracker,
    pub backoff: BackoffConfig,
}

/// Accept connections from `listener` until `options.shutdown` fires.
///
/// Each accepted stream is handed to a task tracked by `options.tracker`.
/// Failed accepts are retried after an exponentially growing delay. While
/// the listener is paused the loop waits without accepting.
pub(in crate::listener) async fn accept_loop<L>(
    listener: Arc<L>,
    services: Arc<ConnectionServices>,
    options: AcceptLoopOptions,
) where
    L: AcceptListener + 'static,
{
    let backoff = options.backoff.normalized();
    let mut delay = backoff.initial_delay;
    while let Some(next) = accept_iteration(&listener, &services, &options, &backoff, delay).await {
        delay = next;
    }
}

#[expect(
    clippy::integer_division_remainder_used,
    reason = "tokio::select! expands to modulus internally"
)]
async fn accept_iteration<L>(
    listener: &Arc<L>,
    services: &Arc<ConnectionServices>,
    options: &AcceptLoopOptions,
    backoff: &BackoffConfig,
    delay: Duration,
) -> Option<Duration>
where
    L: AcceptListener + 'static,
{
    if options.state.is_paused() {
        return select! {
            biased;

            () = options.shutdown.cancelled() => None,
            () = options.state.wait_resumed() => Some(delay),
        };
    }
    select! {
        biased;

        () = options.shutdown.cancelled() => None,
        res = listener.accept() => Some(match res {
            Ok((stream, peer)) => {
                spawn_connection_task(
                    stream,
                    peer,
                    Arc::clone(services),
                    options.shutdown.clone(),
                    &options.tracker,
                );
                backoff.initial_delay
            }
            Err(e) => {
                let local_addr = listener.local_addr().ok();
                warn!("accept error: error={e:?}, local_addr={local_addr:?}");
                sleep(delay).await;
                backoff.next_delay(delay)
            }
        }),
    }
}
