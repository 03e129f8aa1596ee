//! A peer: one accepted connection and where it is in its lifecycle.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use chatrelay_protocol::ClientId;
use chatrelay_transport::{Connection, ConnectionId, TransportError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

/// Frames a peer may have waiting for its socket before new ones are
/// dropped.
pub const DEFAULT_OUTBOX_LEN: usize = 64;

/// How long [`Peer::close`] lets queued frames drain before it releases
/// the stream anyway.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// PeerState
// ---------------------------------------------------------------------------

/// Lifecycle of a peer session.
///
/// ```text
///   Handshaking ──(registered)──→ Active ──(EOF / error / stop)──→ Closing ──→ Closed
///        │                                                            ↑
///        └──────────────(rejected / EOF before registering)───────────┘
/// ```
///
/// Transitions only move forward. A peer is in the [`Registry`] exactly
/// while it is `Active`; the registry performs both the `Handshaking →
/// Active` and the `Active → Closing` transitions under its own lock.
///
/// [`Registry`]: crate::Registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PeerState {
    /// Accepted, waiting for the registration frame.
    Handshaking,
    /// Registered and routable.
    Active,
    /// Shutting down; no longer routable.
    Closing,
    /// Stream released.
    Closed,
}

// ---------------------------------------------------------------------------
// Peer
// ---------------------------------------------------------------------------

/// One live peer session.
///
/// Reads belong to the peer's own handler task. Writes may come from any
/// task (its own replies, other peers' broadcasts and direct messages)
/// and go through a bounded outbox. A single writer task owns the socket
/// side of that outbox, so a peer that stops reading only ever fills its
/// own queue.
pub struct Peer<C: Connection> {
    conn: Arc<C>,
    client_id: OnceLock<ClientId>,
    state: Mutex<PeerState>,
    outbox: Mutex<Option<mpsc::Sender<String>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
    outbox_len: usize,
}

impl<C: Connection> Peer<C> {
    /// Wraps a freshly accepted connection in state `Handshaking` and
    /// starts its writer task.
    ///
    /// `outbox_len` is clamped to at least one. Must be called from within
    /// a Tokio runtime.
    pub fn open(conn: C, outbox_len: usize) -> Self {
        let outbox_len = outbox_len.max(1);
        let conn = Arc::new(conn);
        let (tx, rx) = mpsc::channel(outbox_len);
        let writer = tokio::spawn(drain_outbox(Arc::clone(&conn), rx));
        Self {
            conn,
            client_id: OnceLock::new(),
            state: Mutex::new(PeerState::Handshaking),
            outbox: Mutex::new(Some(tx)),
            writer: Mutex::new(Some(writer)),
            outbox_len,
        }
    }

    /// The underlying connection.
    pub fn connection(&self) -> &C {
        &self.conn
    }

    /// The transport-level connection ID.
    pub fn connection_id(&self) -> ConnectionId {
        self.conn.id()
    }

    /// The remote address of the peer.
    pub fn addr(&self) -> SocketAddr {
        self.conn.peer_addr()
    }

    /// The registered identifier, once the handshake has succeeded.
    pub fn client_id(&self) -> Option<&ClientId> {
        self.client_id.get()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PeerState {
        *self.lock_state()
    }

    /// Waits for the next frame. `Ok(None)` means the stream ended.
    pub async fn read_frame(&self) -> Result<Option<String>, TransportError> {
        self.conn.recv().await
    }

    /// Capacity of the outbox.
    pub fn outbox_len(&self) -> usize {
        self.outbox_len
    }

    /// Queues one frame for the writer task. Never waits.
    ///
    /// Returns [`TransportError::QueueFull`] when the peer is not keeping
    /// up; the frame is dropped. Fails with `ConnectionClosed` once the
    /// peer is closing or its stream has broken.
    pub fn write_frame(&self, frame: &str) -> Result<(), TransportError> {
        let outbox = self.outbox.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = outbox.as_ref() else {
            return Err(self.closed_error());
        };
        tx.try_send(frame.to_owned()).map_err(|e| match e {
            TrySendError::Full(_) => TransportError::QueueFull(self.outbox_len),
            TrySendError::Closed(_) => self.closed_error(),
        })
    }

    /// Flushes what is already queued, releases the stream and moves to
    /// `Closed`.
    ///
    /// The flush is bounded by a short timeout so a peer that never reads
    /// cannot hold up its own close. Safe to call any number of times from
    /// any task; a concurrent `read_frame` returns `Ok(None)`.
    pub async fn close(&self) {
        {
            let mut state = self.lock_state();
            if *state == PeerState::Closed {
                return;
            }
            *state = PeerState::Closing;
        }
        // Dropping the sender lets the writer finish the backlog and exit.
        drop(
            self.outbox
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
        let writer = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(writer) = writer {
            if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, writer).await.is_err() {
                tracing::debug!(
                    conn = %self.connection_id(),
                    "outbox not drained before close"
                );
            }
        }
        if let Err(e) = self.conn.close().await {
            tracing::debug!(
                conn = %self.connection_id(),
                error = %e,
                "error while closing connection"
            );
        }
        *self.lock_state() = PeerState::Closed;
    }

    /// `Handshaking → Active`, recording the identifier. Returns `false`
    /// if the peer has already left `Handshaking`.
    pub(crate) fn activate(&self, id: ClientId) -> bool {
        let mut state = self.lock_state();
        if *state != PeerState::Handshaking {
            return false;
        }
        if self.client_id.set(id).is_err() {
            return false;
        }
        *state = PeerState::Active;
        true
    }

    /// `Active → Closing`. Leaves later states untouched.
    pub(crate) fn deactivate(&self) {
        let mut state = self.lock_state();
        if *state == PeerState::Active {
            *state = PeerState::Closing;
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, PeerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn closed_error(&self) -> TransportError {
        TransportError::ConnectionClosed(format!("{} closed", self.connection_id()))
    }
}

/// The writer task: moves queued frames onto the socket, one at a time,
/// until the outbox is closed or the stream breaks.
async fn drain_outbox<C: Connection>(conn: Arc<C>, mut outbox: mpsc::Receiver<String>) {
    while let Some(frame) = outbox.recv().await {
        match conn.send(&frame).await {
            Ok(()) => {}
            Err(TransportError::FrameTooLong(max)) => {
                tracing::warn!(conn = %conn.id(), max, "dropping oversized outbound frame");
            }
            Err(e) => {
                tracing::debug!(conn = %conn.id(), error = %e, "peer writer stopped");
                break;
            }
        }
    }
}

impl<C: Connection> std::fmt::Debug for Peer<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("conn", &self.connection_id())
            .field("addr", &self.addr())
            .field("client_id", &self.client_id())
            .field("state", &self.state())
            .field("outbox_len", &self.outbox_len)
            .finish()
    }
}
