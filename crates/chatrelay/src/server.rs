//! `RelayServer` builder, start/stop control, and the accept loop.
//!
//! This is the entry point for running a relay. It ties together all the
//! layers: transport → handler → router → registry.
//!
//! ```text
//!            start(addr)                 stop()
//! Stopped ───────────────→ Listening ───────────→ Stopped
//! ```

use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chatrelay_protocol::ClientId;
use chatrelay_registry::Registry;
use chatrelay_transport::{Connection, TcpTransport, Transport};
use futures_util::future::join_all;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::event::{EventSink, Events, RelayEvent, TracingSink};
use crate::handler::handle_connection;
use crate::{RelayConfig, RelayError};

/// Shared state passed to each connection handler task.
///
/// Wrapped in `Arc` so it can be cheaply cloned across tasks. The registry
/// is the only part that changes after start.
pub(crate) struct ServerState<C: Connection> {
    pub(crate) registry: Registry<C>,
    pub(crate) events: Events,
    pub(crate) max_id_len: usize,
    pub(crate) handshake_timeout: Option<Duration>,
    pub(crate) outbound_queue_len: usize,
}

impl<C: Connection> ServerState<C> {
    pub(crate) fn new(events: Events, config: &RelayConfig) -> Self {
        Self {
            registry: Registry::new(),
            events,
            max_id_len: config.max_id_len,
            handshake_timeout: config.handshake_timeout(),
            outbound_queue_len: config.outbound_queue_len,
        }
    }
}

/// Builder for configuring a relay server.
///
/// # Example
///
/// ```rust,no_run
/// use chatrelay::prelude::*;
///
/// # async fn run() -> Result<(), RelayError> {
/// let server = RelayServer::builder()
///     .bind("127.0.0.1:5555")
///     .event_sink(TracingSink)
///     .build();
/// server.listen().await?;
/// # Ok(())
/// # }
/// ```
pub struct RelayServerBuilder {
    config: RelayConfig,
    sink: Arc<dyn EventSink>,
}

impl RelayServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: RelayConfig::default(),
            sink: Arc::new(TracingSink),
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: RelayConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the address [`RelayServer::listen`] binds to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind_addr = addr.to_string();
        self
    }

    /// Sets the largest accepted identifier, in bytes.
    pub fn max_id_len(mut self, len: usize) -> Self {
        self.config.max_id_len = len;
        self
    }

    /// Sets the largest accepted frame, in bytes.
    pub fn max_frame_len(mut self, len: usize) -> Self {
        self.config.max_frame_len = len;
        self
    }

    /// Sets how many frames may wait for each peer's socket before new
    /// ones are dropped.
    pub fn outbound_queue_len(mut self, len: usize) -> Self {
        self.config.outbound_queue_len = len;
        self
    }

    /// Sets how many seconds a new peer may take to register.
    pub fn handshake_timeout_secs(mut self, secs: u64) -> Self {
        self.config.handshake_timeout_secs = Some(secs);
        self
    }

    /// Sets the sink that receives every [`RelayEvent`].
    pub fn event_sink(mut self, sink: impl EventSink) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    /// Builds a server on the line-framed TCP transport.
    pub fn build(self) -> RelayServer<TcpTransport> {
        self.build_with()
    }

    /// Builds a server on any transport, e.g. `WebSocketTransport`.
    pub fn build_with<T: Transport>(self) -> RelayServer<T> {
        RelayServer {
            config: self.config,
            events: Events::new(self.sink),
            running: Mutex::new(None),
            _transport: PhantomData,
        }
    }
}

impl Default for RelayServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything that exists only while the server is listening.
struct Running<C: Connection> {
    addr: SocketAddr,
    state: Arc<ServerState<C>>,
    shutdown: CancellationToken,
    accept_task: JoinHandle<()>,
}

/// A chat relay server.
///
/// Idle until [`start`](Self::start); can be stopped and started again.
/// All methods take `&self`, so the server can be shared with a control
/// surface behind an `Arc`.
pub struct RelayServer<T: Transport = TcpTransport> {
    config: RelayConfig,
    events: Events,
    running: Mutex<Option<Running<T::Connection>>>,
    _transport: PhantomData<fn() -> T>,
}

impl RelayServer<TcpTransport> {
    /// Creates a new builder.
    pub fn builder() -> RelayServerBuilder {
        RelayServerBuilder::new()
    }
}

impl<T: Transport> RelayServer<T> {
    /// The server's configuration.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Starts listening on the configured `bind_addr`.
    pub async fn listen(&self) -> Result<SocketAddr, RelayError> {
        self.start(&self.config.bind_addr).await
    }

    /// Binds `bind_addr` and starts accepting peers.
    ///
    /// Returns the bound address (useful with port 0). A bind failure is
    /// reported to the event sink and returned as [`RelayError::Bind`];
    /// the server stays stopped.
    pub async fn start(&self, bind_addr: &str) -> Result<SocketAddr, RelayError> {
        let mut running = self.running.lock().await;
        if let Some(current) = running.as_ref() {
            return Err(RelayError::AlreadyRunning(current.addr));
        }

        let transport = match T::bind(bind_addr, self.config.server_frame_limits()).await {
            Ok(transport) => transport,
            Err(e) => {
                self.events.emit(RelayEvent::BindFailed {
                    addr: bind_addr.to_string(),
                    reason: e.to_string(),
                });
                return Err(e.into());
            }
        };
        let addr = transport.local_addr().map_err(|source| RelayError::Bind {
            addr: bind_addr.to_string(),
            source,
        })?;

        let state = Arc::new(ServerState::new(self.events.clone(), &self.config));
        let shutdown = CancellationToken::new();
        let accept_task = tokio::spawn(accept_loop(
            transport,
            Arc::clone(&state),
            shutdown.clone(),
        ));

        tracing::info!(%addr, "chat relay listening");
        self.events.emit(RelayEvent::ServerStarted { addr });

        *running = Some(Running {
            addr,
            state,
            shutdown,
            accept_task,
        });
        Ok(addr)
    }

    /// Stops the server.
    ///
    /// Closes the listener, unblocks every handler (registered or still
    /// handshaking), closes every registered peer, and empties the
    /// registry. Returns `false` if the server was not running.
    pub async fn stop(&self) -> bool {
        let Some(running) = self.running.lock().await.take() else {
            return false;
        };

        running.shutdown.cancel();
        if let Err(e) = running.accept_task.await {
            tracing::error!(error = %e, "accept loop task failed");
        }

        let peers = running.state.registry.drain();
        let mut closes = Vec::with_capacity(peers.len());
        for peer in &peers {
            closes.push(peer.close());
        }
        join_all(closes).await;

        tracing::info!(addr = %running.addr, closed = peers.len(), "chat relay stopped");
        self.events.emit(RelayEvent::ServerStopped);
        true
    }

    /// Returns `true` while the accept loop is running.
    ///
    /// Turns `false` after `stop`, or if the listener failed; in the latter
    /// case already-registered peers keep working until `stop` is called.
    pub async fn is_listening(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|r| !r.accept_task.is_finished())
    }

    /// The bound address, while listening.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.addr)
    }

    /// Identifiers currently registered, sorted. Empty when stopped.
    pub async fn connected_ids(&self) -> Vec<ClientId> {
        match self.running.lock().await.as_ref() {
            Some(running) => running.state.registry.snapshot_ids(),
            None => Vec::new(),
        }
    }
}

/// Accepts sockets and spawns a handler for each until `shutdown`.
///
/// Per-connection setup happens in the handler task, so this loop only
/// ever waits on the listener.
async fn accept_loop<T: Transport>(
    mut transport: T,
    state: Arc<ServerState<T::Connection>>,
    shutdown: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                tracing::debug!("accept loop stopping");
                break;
            }
            accepted = transport.accept() => accepted,
        };

        match accepted {
            Ok(accepted) => {
                let state = Arc::clone(&state);
                let shutdown = shutdown.clone();
                tokio::spawn(handle_connection::<T>(accepted, state, shutdown));
            }
            Err(_) if shutdown.is_cancelled() => break,
            Err(e) => {
                tracing::error!(error = %e, "accept failed");
                state.events.emit(RelayEvent::AcceptFailed {
                    reason: e.to_string(),
                });
                break;
            }
        }
    }
    // Dropping the transport closes the listening socket.
}
