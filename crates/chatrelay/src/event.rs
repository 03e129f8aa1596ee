//! The event sink: how the relay reports what it is doing.
//!
//! The server calls [`EventSink::notify`] for every state change: start,
//! stop, connect, disconnect, routed message, and failure. What happens to
//! the event is up to the sink. A control panel might append it to a log
//! pane, [`TracingSink`] writes it to the log, [`NullSink`] drops it.
//!
//! Sinks are called inline from connection handlers, so `notify` must
//! return quickly and must not block. A sink that panics is contained;
//! the panic is logged and the relay carries on.

use std::fmt;
use std::net::SocketAddr;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use chatrelay_protocol::ClientId;
use chrono::{DateTime, Local};
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Why a registered peer's session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The peer closed its end of the stream.
    ClosedByPeer,
    /// Reading from the peer failed.
    ReadError(String),
    /// The server was stopped.
    ServerStopped,
    /// The handler ended without reaching its normal exit.
    Aborted,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClosedByPeer => f.write_str("connection closed"),
            Self::ReadError(e) => write!(f, "read error: {e}"),
            Self::ServerStopped => f.write_str("server stopped"),
            Self::Aborted => f.write_str("handler aborted"),
        }
    }
}

/// Something the relay did or observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// The listener is up.
    ServerStarted { addr: SocketAddr },
    /// The listener is down and every peer has been closed.
    ServerStopped,
    /// `start` could not bind.
    BindFailed { addr: String, reason: String },
    /// The accept loop hit an error it cannot recover from.
    AcceptFailed { reason: String },
    /// A peer registered.
    Connected { id: ClientId, addr: SocketAddr },
    /// A peer's registration was refused.
    Rejected { addr: SocketAddr, reason: String },
    /// A registered peer left.
    Disconnected { id: ClientId, reason: DisconnectReason },
    /// A broadcast went out to `recipients` peers.
    Broadcast {
        from: ClientId,
        text: String,
        recipients: usize,
    },
    /// A direct message was routed. `delivered` is `false` when the
    /// target was unknown or the write failed.
    Direct {
        from: ClientId,
        to: String,
        text: String,
        delivered: bool,
    },
    /// A write to a peer failed and the frame was dropped.
    DeliveryFailed { to: ClientId, reason: String },
    /// A peer sent a frame that matched no command.
    ProtocolViolation { id: ClientId, raw: String },
    /// A peer asked for the directory.
    Directory { id: ClientId, count: usize },
}

impl fmt::Display for RelayEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServerStarted { addr } => write!(f, "Server started on {addr}"),
            Self::ServerStopped => f.write_str("Server stopped"),
            Self::BindFailed { addr, reason } => {
                write!(f, "Error starting server on {addr}: {reason}")
            }
            Self::AcceptFailed { reason } => write!(f, "Accept failed: {reason}"),
            Self::Connected { id, addr } => write!(f, "{id} connected from {addr}"),
            Self::Rejected { addr, reason } => {
                write!(f, "Rejected connection from {addr}: {reason}")
            }
            Self::Disconnected { id, reason } => {
                write!(f, "{id} disconnected ({reason})")
            }
            Self::Broadcast { from, text, .. } => write!(f, "{from} (ALL): {text}"),
            Self::Direct {
                from,
                to,
                text,
                delivered,
            } => {
                write!(f, "{from} -> {to}: {text}")?;
                if !delivered {
                    f.write_str(" (not delivered)")?;
                }
                Ok(())
            }
            Self::DeliveryFailed { to, reason } => {
                write!(f, "Delivery to {to} failed: {reason}")
            }
            Self::ProtocolViolation { id, raw } => {
                write!(f, "{id} sent an invalid frame: {raw:?}")
            }
            Self::Directory { id, count } => {
                write!(f, "{id} listed {count} clients")
            }
        }
    }
}

/// A timestamped [`RelayEvent`].
///
/// `Display` renders a log line: `[14:03:27] alice connected from ...`.
#[derive(Debug, Clone)]
pub struct Event {
    /// When the relay produced the event.
    pub at: DateTime<Local>,
    /// What happened.
    pub kind: RelayEvent,
}

impl Event {
    /// Stamps `kind` with the current local time.
    pub fn now(kind: RelayEvent) -> Self {
        Self {
            at: Local::now(),
            kind,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.at.format("%H:%M:%S"), self.kind)
    }
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Receives every event the relay produces.
pub trait EventSink: Send + Sync + 'static {
    /// Handles one event. Must not block.
    fn notify(&self, event: &Event);
}

impl<S: EventSink + ?Sized> EventSink for Arc<S> {
    fn notify(&self, event: &Event) {
        (**self).notify(event);
    }
}

/// Writes events to the `tracing` log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn notify(&self, event: &Event) {
        match &event.kind {
            RelayEvent::BindFailed { .. } | RelayEvent::AcceptFailed { .. } => {
                tracing::error!(target: "chatrelay::events", "{}", event.kind);
            }
            RelayEvent::DeliveryFailed { .. } => {
                tracing::warn!(target: "chatrelay::events", "{}", event.kind);
            }
            RelayEvent::ProtocolViolation { .. } | RelayEvent::Directory { .. } => {
                tracing::debug!(target: "chatrelay::events", "{}", event.kind);
            }
            _ => tracing::info!(target: "chatrelay::events", "{}", event.kind),
        }
    }
}

/// Forwards events into an unbounded channel, e.g. for a UI thread.
///
/// Sending never blocks. Events are dropped once the receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Event>,
}

impl ChannelSink {
    /// Creates a sink and the receiver that drains it.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn notify(&self, event: &Event) {
        let _ = self.tx.send(event.clone());
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn notify(&self, _event: &Event) {}
}

/// The relay's handle on its sink. Stamps events and contains panics.
#[derive(Clone)]
pub(crate) struct Events {
    sink: Arc<dyn EventSink>,
}

impl Events {
    pub(crate) fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    pub(crate) fn emit(&self, kind: RelayEvent) {
        let event = Event::now(kind);
        if catch_unwind(AssertUnwindSafe(|| self.sink.notify(&event))).is_err() {
            tracing::error!(event = %event.kind, "event sink panicked");
        }
    }
}
