//! Per-connection handler: handshake, read loop, and cleanup.
//!
//! Each accepted socket gets its own Tokio task running this handler.
//! The flow is:
//!   0. Finish transport setup (e.g. the WebSocket upgrade)
//!   1. Receive the identifier frame → validate → register
//!   2. Loop: receive frames → hand each to the router
//!   3. On EOF, read error, or server stop: leave the registry, close the
//!      stream, report the disconnect. Exactly once, whatever the exit path.

use std::sync::Arc;

use chatrelay_protocol::{ClientId, Rejection, ServerFrame};
use chatrelay_registry::Peer;
use chatrelay_transport::{Connection, Transport, TransportError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::event::{DisconnectReason, RelayEvent};
use crate::router;
use crate::server::ServerState;
use crate::RelayError;

/// Drop guard that owns a registered peer's cleanup.
///
/// [`finish`](Self::finish) is the normal exit: it releases the registry
/// slot and closes the stream before the guard drops. If the handler
/// future is dropped or panics first, `Drop` still releases the slot and
/// reports the disconnect, and spawns a task to close the stream since
/// `Drop` cannot await.
struct Registration<C: Connection> {
    id: ClientId,
    peer: Arc<Peer<C>>,
    state: Arc<ServerState<C>>,
    reason: Option<DisconnectReason>,
}

impl<C: Connection> Registration<C> {
    async fn finish(mut self, reason: DisconnectReason) {
        self.state
            .registry
            .release(self.id.as_str(), self.peer.connection_id());
        self.peer.close().await;
        self.reason = Some(reason);
    }
}

impl<C: Connection> Drop for Registration<C> {
    fn drop(&mut self) {
        self.state
            .registry
            .release(self.id.as_str(), self.peer.connection_id());

        let reason = match self.reason.take() {
            Some(reason) => reason,
            None => {
                let peer = Arc::clone(&self.peer);
                if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                    runtime.spawn(async move { peer.close().await });
                }
                DisconnectReason::Aborted
            }
        };

        tracing::info!(id = %self.id, %reason, "peer disconnected");
        self.state.events.emit(RelayEvent::Disconnected {
            id: self.id.clone(),
            reason,
        });
    }
}

/// Handles a single connection from accept to close.
///
/// The handshake timeout, when set, covers transport setup and the
/// identifier frame together.
pub(crate) async fn handle_connection<T: Transport>(
    accepted: T::Accepted,
    state: Arc<ServerState<T::Connection>>,
    shutdown: CancellationToken,
) {
    let deadline = state.handshake_timeout.map(|limit| Instant::now() + limit);
    let conn = match establish::<T>(accepted, deadline, &shutdown).await {
        Ok(conn) => conn,
        Err(e) => {
            tracing::debug!(error = %e, "connection setup failed");
            return;
        }
    };

    let peer = Arc::new(Peer::open(conn, state.outbound_queue_len));
    let conn_id = peer.connection_id();
    let addr = peer.addr();
    tracing::debug!(%conn_id, %addr, "handling new connection");

    // --- Step 1: Handshake ---
    let id = match perform_handshake(&peer, &state, &shutdown, deadline).await {
        Ok(id) => id,
        Err(e) => {
            tracing::debug!(%conn_id, %addr, error = %e, "handshake failed");
            if let RelayError::Handshake(reason) = &e {
                state.events.emit(RelayEvent::Rejected {
                    addr,
                    reason: reason.to_string(),
                });
            }
            peer.close().await;
            return;
        }
    };

    let registration = Registration {
        id: id.clone(),
        peer: Arc::clone(&peer),
        state: Arc::clone(&state),
        reason: None,
    };
    tracing::info!(%conn_id, %id, %addr, "peer registered");
    state.events.emit(RelayEvent::Connected {
        id: id.clone(),
        addr,
    });

    // --- Step 2: Read loop ---
    let reason = read_loop(&peer, &id, &state, &shutdown).await;

    // --- Step 3: Cleanup ---
    registration.finish(reason).await;
}

/// Runs the transport's per-connection setup, cut short by server
/// shutdown or the handshake deadline.
async fn establish<T: Transport>(
    accepted: T::Accepted,
    deadline: Option<Instant>,
    shutdown: &CancellationToken,
) -> Result<T::Connection, TransportError> {
    let setup = async {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => Err(TransportError::ConnectionClosed(
                "server stopped during setup".into(),
            )),
            conn = T::establish(accepted) => conn,
        }
    };
    match deadline {
        Some(deadline) => match tokio::time::timeout_at(deadline, setup).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::ConnectionClosed(
                "setup timed out".into(),
            )),
        },
        None => setup.await,
    }
}

/// Reads the identifier frame and registers the peer under it.
async fn perform_handshake<C: Connection>(
    peer: &Arc<Peer<C>>,
    state: &ServerState<C>,
    shutdown: &CancellationToken,
    deadline: Option<Instant>,
) -> Result<ClientId, RelayError> {
    let first = match deadline {
        Some(deadline) => {
            match tokio::time::timeout_at(deadline, read_or_stop(peer, shutdown)).await {
                Ok(result) => result,
                Err(_) => return reject(peer, Rejection::HandshakeTimeout),
            }
        }
        None => read_or_stop(peer, shutdown).await,
    };

    let line = match first? {
        Some(line) => line,
        None => {
            return Err(RelayError::Transport(TransportError::ConnectionClosed(
                "closed before registering".into(),
            )));
        }
    };

    let id = match ClientId::parse(&line, state.max_id_len) {
        Ok(id) => id,
        Err(e) => return reject(peer, Rejection::from(&e)),
    };

    if !state.registry.try_register(id.clone(), peer) {
        return reject(peer, Rejection::IdInUse);
    }
    Ok(id)
}

/// Queues the rejection frame, best-effort, and fails the handshake. The
/// caller's `close` flushes it before the stream is released.
fn reject<C: Connection>(peer: &Peer<C>, reason: Rejection) -> Result<ClientId, RelayError> {
    let frame = ServerFrame::rejection(reason).to_string();
    if let Err(e) = peer.write_frame(&frame) {
        tracing::debug!(
            conn = %peer.connection_id(),
            error = %e,
            "failed to send rejection"
        );
    }
    Err(RelayError::Handshake(reason))
}

/// Routes frames until the stream ends, fails, or the server stops.
async fn read_loop<C: Connection>(
    peer: &Peer<C>,
    id: &ClientId,
    state: &ServerState<C>,
    shutdown: &CancellationToken,
) -> DisconnectReason {
    loop {
        match read_or_stop(peer, shutdown).await {
            Ok(Some(frame)) => {
                tracing::debug!(%id, len = frame.len(), "frame received");
                router::route(state, peer, id, &frame);
            }
            Ok(None) if shutdown.is_cancelled() => {
                return DisconnectReason::ServerStopped;
            }
            Ok(None) => return DisconnectReason::ClosedByPeer,
            Err(e) => {
                tracing::debug!(%id, error = %e, "recv error");
                return DisconnectReason::ReadError(e.to_string());
            }
        }
    }
}

/// One `read_frame`, cut short by server shutdown.
async fn read_or_stop<C: Connection>(
    peer: &Peer<C>,
    shutdown: &CancellationToken,
) -> Result<Option<String>, TransportError> {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => Ok(None),
        frame = peer.read_frame() => frame,
    }
}
