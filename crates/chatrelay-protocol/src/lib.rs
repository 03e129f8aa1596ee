//! Wire protocol for chatrelay.
//!
//! This crate defines the text that peers and the relay exchange, one
//! line per frame:
//!
//! - **Identifiers** ([`ClientId`]) — the validated name a peer registers
//!   under with its first frame.
//! - **Client frames** ([`RoutedMessage`], [`ClientFrame`]) — `LIST`,
//!   `ALL:<text>`, `TO:<target>:<text>`.
//! - **Server frames** ([`ServerFrame`], [`Rejection`]) — directory
//!   responses, errors, and delivered messages.
//! - **Errors** ([`ProtocolError`]).
//!
//! # Architecture
//!
//! The protocol layer sits between transport (whole lines) and the
//! registry (who is reachable). It knows nothing about sockets; it only
//! classifies and renders text.
//!
//! ```text
//! Transport (line) → Protocol (RoutedMessage) → Router (deliveries)
//! ```

mod error;
mod frame;
mod id;
mod message;

pub use error::ProtocolError;
pub use frame::{
    CLIENTS_PREFIX, ERROR_PREFIX, Rejection, ServerFrame, max_relayed_len,
};
pub use id::{ClientId, DEFAULT_MAX_ID_LEN};
pub use message::{
    BROADCAST_PREFIX, ClientFrame, DIRECT_PREFIX, LIST, RoutedMessage,
};
