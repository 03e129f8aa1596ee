//! Peer lifecycle and the identifier registry for chatrelay.
//!
//! This crate answers one question for the rest of the server: *who is
//! reachable right now?*
//!
//! 1. **Peers** — a [`Peer`] wraps one accepted connection and walks it
//!    through `Handshaking → Active → Closing → Closed`.
//! 2. **Registry** — the [`Registry`] maps each [`ClientId`] to the one
//!    `Active` peer that holds it.
//!
//! # How it fits in the stack
//!
//! ```text
//! Router (above)  ← looks up targets, snapshots peers for broadcast
//!     ↕
//! Registry Layer (this crate)  ← identifier ownership and peer state
//!     ↕
//! Transport / Protocol (below)  ← Connection, ClientId
//! ```
//!
//! [`ClientId`]: chatrelay_protocol::ClientId

mod peer;
mod registry;

pub use peer::{DEFAULT_OUTBOX_LEN, Peer, PeerState};
pub use registry::Registry;
