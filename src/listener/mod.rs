//! Network listeners.
//!
//! A [`Listener`] binds a TCP socket, accepts connections on a configurable
//! number of worker loops, and drives each connection through the pipeline
//! assembled by its [`ListenerComposer`]. While running it publishes a
//! monitoring view of its configuration and flags; the composer keeps the
//! views of the codec, keep-alive policy, cache and transport in step with
//! the installed [`StageSet`].

use std::{
    fmt,
    net::{SocketAddr, TcpListener as StdTcpListener},
    sync::Arc,
};

use tokio::{net::TcpListener, sync::oneshot};

mod composer;
mod config;
mod error;
mod protocols;
mod runtime;

pub use composer::{ListenerComposer, ReconcileAction, Reconciliation, Slot, StageSet};
pub use config::{
    DEFAULT_IDLE_TIMEOUT_SECS,
    DEFAULT_MAX_HEADER_SIZE,
    DEFAULT_PORT,
    ListenerConfig,
    ListenerState,
};
pub use error::{ComposeError, ListenerError};
pub use protocols::{CodecFactory, FactoryError, ProtocolRegistry};
pub use runtime::BackoffConfig;

use crate::{
    connection::ConnectionRegistry,
    monitoring::{MonitoringRegistry, MonitoringSnapshot, MonitoringView, ViewKey},
    transport::{TcpTransport, Transport},
};

/// Monitoring slot holding a listener's own view.
pub const LISTENER_SLOT: &str = "listener";

/// Listener that has not been bound yet.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unbound;

/// Listener holding a bound socket.
#[derive(Debug, Clone)]
pub struct Bound {
    listener: Arc<TcpListener>,
}

/// Binding state of a [`Listener`].
pub trait ListenerBinding: sealed::Sealed {}

mod sealed {
    //! Prevent external implementations of [`ListenerBinding`].

    pub trait Sealed {}
    impl Sealed for super::Unbound {}
    impl Sealed for super::Bound {}
}

impl ListenerBinding for Unbound {}
impl ListenerBinding for Bound {}

/// TCP listener driving connections through a composed pipeline.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
///
/// use wireline::{
///     listener::{Listener, ListenerComposer, ListenerConfig},
///     monitoring::MonitoringRegistry,
/// };
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), wireline::listener::ListenerError> {
/// let monitoring = Arc::new(MonitoringRegistry::new());
/// let composer = ListenerComposer::new("http", Arc::clone(&monitoring));
/// Listener::new(ListenerConfig::new("http").port(8080), composer)
///     .bind()?
///     .run()
///     .await
/// # }
/// ```
pub struct Listener<S: ListenerBinding = Unbound> {
    config: ListenerConfig,
    state: Arc<ListenerState>,
    composer: Arc<ListenerComposer>,
    protocols: Option<Arc<ProtocolRegistry>>,
    connections: Arc<ConnectionRegistry>,
    transport: Arc<dyn Transport>,
    backoff: BackoffConfig,
    ready_tx: Option<oneshot::Sender<()>>,
    binding: S,
}

impl Listener<Unbound> {
    /// Create an unbound listener.
    ///
    /// The composer's name is the listener's monitoring scope; it should
    /// match `config.name`.
    #[must_use]
    pub fn new(config: ListenerConfig, composer: ListenerComposer) -> Self {
        Self {
            config,
            state: Arc::new(ListenerState::default()),
            composer: Arc::new(composer),
            protocols: None,
            connections: Arc::new(ConnectionRegistry::new()),
            transport: Arc::new(TcpTransport::default()),
            backoff: BackoffConfig::default(),
            ready_tx: None,
            binding: Unbound,
        }
    }

    /// Bind to the configured host and port.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::Bind`] if no resolved address can be bound.
    pub fn bind(self) -> Result<Listener<Bound>, ListenerError> {
        let address = self.config.address();
        let std_listener = StdTcpListener::bind(&address).map_err(|source| ListenerError::Bind {
            address: address.clone(),
            source,
        })?;
        self.bind_existing_listener(std_listener)
    }

    /// Bind to an existing `StdTcpListener`.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::Bind`] if the socket cannot be registered
    /// with the runtime.
    pub fn bind_existing_listener(self, std_listener: StdTcpListener) -> Result<Listener<Bound>, ListenerError> {
        let address = self.config.address();
        let bind_err = |source| ListenerError::Bind {
            address: address.clone(),
            source,
        };
        std_listener.set_nonblocking(true).map_err(bind_err)?;
        let listener = TcpListener::from_std(std_listener).map_err(bind_err)?;
        Ok(Listener {
            config: self.config,
            state: self.state,
            composer: self.composer,
            protocols: self.protocols,
            connections: self.connections,
            transport: self.transport,
            backoff: self.backoff,
            ready_tx: self.ready_tx,
            binding: Bound {
                listener: Arc::new(listener),
            },
        })
    }
}

impl<S: ListenerBinding> Listener<S> {
    /// Codec factories used to honour `config.protocol` at start-up.
    #[must_use]
    pub fn protocols(mut self, protocols: Arc<ProtocolRegistry>) -> Self {
        self.protocols = Some(protocols);
        self
    }

    /// Transport used when the stage set does not name one.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    /// Back-off applied when `accept()` fails.
    #[must_use]
    pub fn accept_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff.normalized();
        self
    }

    /// Signal `tx` once the accept loops are running.
    #[must_use]
    pub fn ready_signal(mut self, tx: oneshot::Sender<()>) -> Self {
        self.ready_tx = Some(tx);
        self
    }

    /// Static configuration.
    #[must_use]
    pub fn config(&self) -> &ListenerConfig { &self.config }

    /// Started and paused flags, shared with the running accept loops.
    #[must_use]
    pub fn state(&self) -> Arc<ListenerState> { Arc::clone(&self.state) }

    /// Stage composer.
    #[must_use]
    pub fn composer(&self) -> Arc<ListenerComposer> { Arc::clone(&self.composer) }

    /// Connections currently served.
    #[must_use]
    pub fn connections(&self) -> Arc<ConnectionRegistry> { Arc::clone(&self.connections) }

    /// Monitoring key of the listener's own view.
    #[must_use]
    pub fn view_key(&self) -> ViewKey { ViewKey::new(self.composer.name(), LISTENER_SLOT) }

    fn view(&self) -> Arc<dyn MonitoringView> {
        Arc::new(ListenerView {
            config: self.config.clone(),
            state: Arc::clone(&self.state),
            connections: Arc::clone(&self.connections),
        })
    }

    fn monitoring(&self) -> &Arc<MonitoringRegistry> { self.composer.monitoring() }
}

impl Listener<Bound> {
    /// Address the socket is bound to.
    ///
    /// # Errors
    ///
    /// Returns the socket error, if any.
    pub fn local_addr(&self) -> Result<SocketAddr, ListenerError> { Ok(self.binding.listener.local_addr()?) }
}

impl<S: ListenerBinding> fmt::Debug for Listener<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("composer", &self.composer)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

struct ListenerView {
    config: ListenerConfig,
    state: Arc<ListenerState>,
    connections: Arc<ConnectionRegistry>,
}

impl MonitoringView for ListenerView {
    fn snapshot(&self) -> MonitoringSnapshot {
        let config = &self.config;
        let mut snapshot = MonitoringSnapshot::new("listener")
            .with("name", config.name.as_str())
            .with("host", config.host.as_str())
            .with("port", config.port)
            .with("secure", config.secure)
            .with("max-header-size", config.max_header_size)
            .with("chunking-enabled", config.chunking_enabled)
            .with("started", self.state.is_started())
            .with("paused", self.state.is_paused())
            .with("connections", self.connections.active_ids().len());
        if let Some(secs) = config.idle_timeout_secs {
            snapshot = snapshot.with("idle-timeout-seconds", secs);
        }
        if let Some(bytes) = config.max_pending_bytes {
            snapshot = snapshot.with("max-pending-bytes", bytes);
        }
        if let Some(protocol) = &config.protocol {
            snapshot = snapshot.with("protocol", protocol.as_str());
        }
        snapshot
    }
}
