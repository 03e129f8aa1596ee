//! Routing: what to do with one frame from a registered peer.
//!
//! Each frame parses into a [`RoutedMessage`] and is dispatched:
//!
//! | Message       | Action                                              |
//! |---------------|-----------------------------------------------------|
//! | `ListQuery`   | reply `CLIENTS:<ids>` to the sender (self included) |
//! | `Broadcast`   | `<from> (ALL): <text>` to every other peer          |
//! | `Direct`      | `<from>: <text>` to the target, if registered       |
//! | `Malformed`   | reply `ERROR: ...` to the sender, stay connected    |
//!
//! Routing never waits on a socket. Each frame is queued on the
//! recipient's outbox and written by that peer's own writer task. A frame
//! that cannot be queued (outbox full, peer closing) is logged, reported
//! to the event sink, and dropped; the sender never hears about it.

use chatrelay_protocol::{ClientId, Rejection, RoutedMessage, ServerFrame};
use chatrelay_registry::Peer;
use chatrelay_transport::Connection;

use crate::event::{Events, RelayEvent};
use crate::server::ServerState;
use crate::RelayError;

/// Routes one frame from `sender`, registered as `sender_id`.
pub(crate) fn route<C: Connection>(
    state: &ServerState<C>,
    sender: &Peer<C>,
    sender_id: &ClientId,
    frame: &str,
) {
    match RoutedMessage::parse(frame) {
        RoutedMessage::ListQuery => {
            let ids: Vec<String> = state
                .registry
                .snapshot_ids()
                .into_iter()
                .map(|id| id.to_string())
                .collect();
            let count = ids.len();
            let reply = ServerFrame::Directory(ids).to_string();
            deliver(&state.events, sender, sender_id, &reply);
            state.events.emit(RelayEvent::Directory {
                id: sender_id.clone(),
                count,
            });
        }

        RoutedMessage::Broadcast { text } => {
            let line = ServerFrame::Broadcast {
                from: sender_id.to_string(),
                text: text.to_string(),
            }
            .to_string();

            // Snapshot first; the registry lock is released before any write.
            let targets: Vec<_> = state
                .registry
                .snapshot_all()
                .into_iter()
                .filter(|(id, _)| id != sender_id)
                .collect();

            let recipients = targets
                .iter()
                .filter(|(id, peer)| deliver(&state.events, peer, id, &line))
                .count();

            tracing::debug!(from = %sender_id, recipients, "broadcast routed");
            state.events.emit(RelayEvent::Broadcast {
                from: sender_id.clone(),
                text: text.to_string(),
                recipients,
            });
        }

        RoutedMessage::Direct { target_id, text } => {
            let delivered = match state.registry.lookup(target_id) {
                Some(target) => {
                    let line = ServerFrame::Direct {
                        from: sender_id.to_string(),
                        text: text.to_string(),
                    }
                    .to_string();
                    match target.client_id() {
                        Some(id) => deliver(&state.events, &target, id, &line),
                        None => false,
                    }
                }
                None => {
                    tracing::debug!(
                        from = %sender_id,
                        to = target_id,
                        "direct message to unknown client dropped"
                    );
                    false
                }
            };
            state.events.emit(RelayEvent::Direct {
                from: sender_id.clone(),
                to: target_id.to_string(),
                text: text.to_string(),
                delivered,
            });
        }

        RoutedMessage::Malformed { raw } => {
            tracing::debug!(from = %sender_id, raw, "malformed frame");
            let reply = ServerFrame::rejection(Rejection::Malformed).to_string();
            deliver(&state.events, sender, sender_id, &reply);
            state.events.emit(RelayEvent::ProtocolViolation {
                id: sender_id.clone(),
                raw: raw.to_string(),
            });
        }
    }
}

/// Queues `line` for `peer`. Returns whether it was queued; a failure is
/// reported and otherwise swallowed.
fn deliver<C: Connection>(
    events: &Events,
    peer: &Peer<C>,
    to: &ClientId,
    line: &str,
) -> bool {
    match peer.write_frame(line) {
        Ok(()) => true,
        Err(source) => {
            let reason = source.to_string();
            let err = RelayError::Delivery {
                to: to.clone(),
                source,
            };
            tracing::warn!(error = %err, "dropping undeliverable frame");
            events.emit(RelayEvent::DeliveryFailed {
                to: to.clone(),
                reason,
            });
            false
        }
    }
}
