//! # Chatrelay
//!
//! A minimal text chat relay.
//!
//! Peers connect over a line-framed stream, register under a unique
//! identifier, and then exchange three kinds of frames:
//!
//! - `ALL:<text>` delivers `<id> (ALL): <text>` to every other peer
//! - `TO:<target>:<text>` delivers `<id>: <text>` to one peer
//! - `LIST` replies `CLIENTS:<id>,<id>,...` to the sender
//!
//! Anything else earns an `ERROR:` reply and the peer stays connected.
//! Lifecycle and routing activity is reported to an [`EventSink`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chatrelay::prelude::*;
//!
//! # async fn run() -> Result<(), RelayError> {
//! let server = RelayServer::builder()
//!     .bind("0.0.0.0:5555")
//!     .build();
//! let addr = server.listen().await?;
//!
//! let alice = RelayClient::connect(&addr.to_string(), "alice").await?;
//! alice.broadcast("hello").await?;
//!
//! server.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod event;
mod handler;
mod router;
pub mod server;

pub use client::RelayClient;
pub use config::{DEFAULT_BIND_ADDR, RelayConfig};
pub use error::RelayError;
pub use event::{
    ChannelSink, DisconnectReason, Event, EventSink, NullSink, RelayEvent,
    TracingSink,
};
pub use server::{RelayServer, RelayServerBuilder};

pub use chatrelay_protocol as protocol;
pub use chatrelay_registry as registry;
pub use chatrelay_transport as transport;

/// Convenience re-exports for relay users.
pub mod prelude {
    pub use crate::{
        ChannelSink, DisconnectReason, Event, EventSink, NullSink,
        RelayClient, RelayConfig, RelayError, RelayEvent, RelayServer,
        RelayServerBuilder, TracingSink,
    };
    pub use chatrelay_protocol::{
        ClientFrame, ClientId, ProtocolError, Rejection, RoutedMessage,
        ServerFrame,
    };
    pub use chatrelay_registry::{Peer, PeerState, Registry};
    pub use chatrelay_transport::{
        Connection, ConnectionId, FrameLimits, TcpConnection, TcpTransport,
        Transport, TransportError,
    };
    #[cfg(feature = "websocket")]
    pub use chatrelay_transport::{WebSocketConnection, WebSocketTransport};
}
