//! Transport abstraction layer for chatrelay.
//!
//! Provides the [`Transport`] and [`Connection`] traits that abstract over
//! the stream a peer talks on. Every implementation delivers whole frames:
//! one frame is one line of UTF-8 text, never split across two `recv`
//! calls and never merged with its neighbour.
//!
//! # Feature Flags
//!
//! - `websocket` (default) — WebSocket transport via `tokio-tungstenite`,
//!   one text message per frame

mod error;
mod tcp;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
pub use tcp::{TcpConnection, TcpTransport};
#[cfg(feature = "websocket")]
pub use websocket::{PendingWebSocket, WebSocketConnection, WebSocketTransport};

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Default upper bound on a single frame, in bytes.
pub const DEFAULT_MAX_FRAME_LEN: usize = 4096;

/// Per-direction frame length caps, in bytes, excluding the terminator.
///
/// The two directions differ on a relay: a peer's frame comes back out
/// with the sender's identifier prepended, so what a server sends can be
/// longer than what it accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLimits {
    /// Longest frame accepted from the remote side. A longer one is a
    /// receive error that ends the connection.
    pub inbound: usize,
    /// Longest frame this side sends. A longer one fails that send only.
    pub outbound: usize,
}

impl FrameLimits {
    /// Separate caps for each direction.
    pub const fn new(inbound: usize, outbound: usize) -> Self {
        Self { inbound, outbound }
    }

    /// The same cap both ways.
    pub const fn symmetric(len: usize) -> Self {
        Self::new(len, len)
    }
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self::symmetric(DEFAULT_MAX_FRAME_LEN)
    }
}

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocates the next process-wide unique ID.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Binds a listening socket and accepts new incoming connections.
///
/// Accepting is split in two. [`accept`](Transport::accept) only takes the
/// socket off the listener and must never wait on the remote peer;
/// [`establish`](Transport::establish) runs any per-connection setup (a
/// WebSocket upgrade, say) and is driven from that connection's own task,
/// so one slow peer never holds up the listener.
///
/// Methods return `Send` futures so the server can drive them from
/// spawned tasks without knowing the concrete transport.
pub trait Transport: Send + Sync + Sized + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;

    /// A socket taken off the listener, not yet ready for frames.
    type Accepted: Send + 'static;

    /// Binds to `addr`. Every connection accepted from it is framed with
    /// `limits`.
    fn bind(
        addr: &str,
        limits: FrameLimits,
    ) -> impl Future<Output = Result<Self, TransportError>> + Send;

    /// Returns the address the listener is actually bound to.
    fn local_addr(&self) -> std::io::Result<SocketAddr>;

    /// Waits for the next incoming socket.
    fn accept(
        &mut self,
    ) -> impl Future<Output = Result<Self::Accepted, TransportError>> + Send;

    /// Turns an accepted socket into a connection. Failure affects only
    /// that socket.
    fn establish(
        accepted: Self::Accepted,
    ) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;
}

/// A single connection that exchanges text frames.
///
/// `send` may be called from many tasks at once; implementations serialize
/// writes so frames never interleave on the wire. `recv` is meant to be
/// driven by one task only.
pub trait Connection: Send + Sync + 'static {
    /// Sends one frame to the remote peer.
    ///
    /// `frame` must not contain line breaks.
    fn send(
        &self,
        frame: &str,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Receives the next frame from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed, by either
    /// side. A pending `recv` returns `Ok(None)` as soon as [`close`]
    /// is called.
    ///
    /// [`close`]: Connection::close
    fn recv(
        &self,
    ) -> impl Future<Output = Result<Option<String>, TransportError>> + Send;

    /// Closes the connection. Calling it more than once is a no-op.
    fn close(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;

    /// Returns the remote address of the peer.
    fn peer_addr(&self) -> SocketAddr;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_ids_are_allocated_in_order() {
        let first = ConnectionId::next();
        let second = ConnectionId::next();
        assert!(second.into_inner() > first.into_inner());
    }

    #[test]
    fn test_connection_id_renders_for_logs() {
        assert_eq!(ConnectionId::new(7).to_string(), "conn-7");
        assert_eq!(ConnectionId::new(7), ConnectionId::new(7));
    }
}
