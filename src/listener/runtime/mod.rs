//! Runtime control for [`Listener`].

mod accept;
mod backoff;
mod connection;
#[cfg(all(test, not(loom)))]
mod tests;

use std::sync::{Arc, atomic::AtomicU64};

use accept::{AcceptLoopOptions, accept_loop};
pub use backoff::BackoffConfig;
use connection::ConnectionServices;
use futures::Future;
use log::warn;
use tokio::{select, signal};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::info;

use super::{Bound, Listener, ListenerError};
use crate::connection::CloseReason;

impl Listener<Bound> {
    /// Run the listener until Ctrl+C is received.
    ///
    /// # Errors
    ///
    /// See [`run_with_shutdown`](Self::run_with_shutdown).
    pub async fn run(self) -> Result<(), ListenerError> {
        self.run_with_shutdown(async {
            let _ = signal::ctrl_c().await;
        })
        .await
    }

    /// Run the listener until the `shutdown` future resolves.
    ///
    /// On start the configured protocol is selected (when a protocol
    /// registry was supplied and no codec is installed yet) and the
    /// listener's view is registered. On shutdown open connections are
    /// closed, every task is awaited, and all of the listener's views are
    /// removed.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    ///
    /// use tokio::sync::oneshot;
    /// use wireline::{
    ///     listener::{Listener, ListenerComposer, ListenerConfig},
    ///     monitoring::MonitoringRegistry,
    /// };
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), wireline::listener::ListenerError> {
    /// let composer = ListenerComposer::new("demo", Arc::new(MonitoringRegistry::new()));
    /// let listener = Listener::new(
    ///     ListenerConfig::new("demo").host("127.0.0.1").port(0),
    ///     composer,
    /// )
    /// .bind()?;
    ///
    /// let (tx, rx) = oneshot::channel::<()>();
    /// let handle = tokio::spawn(listener.run_with_shutdown(async {
    ///     let _ = rx.await;
    /// }));
    /// let _ = tx.send(());
    /// handle.await.expect("join listener task")?;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::Compose`] if the configured protocol cannot
    /// be selected and [`ListenerError::Monitoring`] if the listener's view
    /// slot is already taken. Accept failures are retried with exponential
    /// back-off and do not surface as errors.
    #[expect(
        clippy::integer_division_remainder_used,
        reason = "tokio::select! expands to modulus internally"
    )]
    pub async fn run_with_shutdown<S>(self, shutdown: S) -> Result<(), ListenerError>
    where
        S: Future<Output = ()> + Send,
    {
        if let (Some(protocols), Some(name)) = (&self.protocols, &self.config.protocol)
            && self.composer.current().codec.is_none()
        {
            self.composer.select_protocol(protocols, name)?;
        }
        let view_key = self.view_key();
        self.monitoring().register(view_key.clone(), self.view())?;

        let services = Arc::new(ConnectionServices {
            composer: Arc::clone(&self.composer),
            connections: Arc::clone(&self.connections),
            write_queue: self.config.write_queue_config(),
            idle_timeout: self.config.idle_timeout_duration(),
            transport: Arc::clone(&self.transport),
            next_id: AtomicU64::new(1),
        });
        let shutdown_token = CancellationToken::new();
        let tracker = TaskTracker::new();

        for _ in 0..self.config.workers.max(1) {
            tracker.spawn(accept_loop(
                Arc::clone(&self.binding.listener),
                Arc::clone(&services),
                AcceptLoopOptions {
                    state: Arc::clone(&self.state),
                    shutdown: shutdown_token.clone(),
                    tracker: tracker.clone(),
                    backoff: self.backoff,
                },
            ));
        }
        self.state.set_started(true);
        info!(
            listener = %self.config.name,
            address = ?self.binding.listener.local_addr().ok(),
            workers = self.config.workers,
            "listener started"
        );

        let Listener {
            ready_tx,
            state,
            composer,
            connections,
            config,
            ..
        } = self;

        // Signal readiness after all workers have been spawned.
        if let Some(tx) = ready_tx
            && tx.send(()).is_err()
        {
            warn!("Failed to send readiness signal: receiver dropped");
        }

        select! {
            () = shutdown => shutdown_token.cancel(),
            () = tracker.wait() => {},
        }

        tracker.close();
        tracker.wait().await;
        let lingering = connections.close_all(CloseReason::Shutdown);
        state.set_started(false);
        composer.monitoring().deregister(&view_key);
        composer.shutdown();
        info!(listener = %config.name, lingering, "listener stopped");
        Ok(())
    }
}
