//! The registry: which identifier belongs to which live peer.
//!
//! # Concurrency note
//!
//! Every operation takes the same `std::sync::Mutex` for the duration of a
//! map operation and nothing else. No method awaits while holding it, and
//! callers get owned snapshots back. The only peer state touched under the
//! lock is the peer's own state mutex (activate and deactivate), which is
//! never held while the registry lock is wanted, so there is a single
//! lock order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chatrelay_protocol::ClientId;
use chatrelay_transport::{Connection, ConnectionId};

use crate::Peer;

/// Shared mapping from [`ClientId`] to the `Active` peer holding it.
///
/// At most one peer per identifier; the first registrant keeps the slot
/// until its handler removes it.
pub struct Registry<C: Connection> {
    peers: Mutex<HashMap<ClientId, Arc<Peer<C>>>>,
}

impl<C: Connection> Registry<C> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            peers: Mutex::new(HashMap::new()),
        }
    }

    /// Registers `peer` under `id` and moves it to `Active`.
    ///
    /// Returns `false`, changing nothing, if `id` is already taken or the
    /// peer is no longer handshaking. The caller then rejects the
    /// handshake and closes the peer without it ever being routable.
    pub fn try_register(&self, id: ClientId, peer: &Arc<Peer<C>>) -> bool {
        let mut peers = self.lock();
        if peers.contains_key(&id) {
            tracing::debug!(%id, "identifier already registered");
            return false;
        }
        if !peer.activate(id.clone()) {
            return false;
        }
        tracing::debug!(%id, conn = %peer.connection_id(), "peer registered");
        peers.insert(id, Arc::clone(peer));
        true
    }

    /// Removes the entry for `id`, if any, and returns its peer.
    ///
    /// Idempotent; safe on error paths and normal shutdown alike.
    pub fn remove(&self, id: &str) -> Option<Arc<Peer<C>>> {
        let mut peers = self.lock();
        let removed = peers.remove(id);
        if let Some(peer) = &removed {
            peer.deactivate();
        }
        removed
    }

    /// Removes the entry for `id` only if it still belongs to connection
    /// `conn`.
    ///
    /// A handler uses this on exit so that, after a stop/start cycle, it can
    /// never evict a newer peer that registered the same identifier.
    pub fn release(&self, id: &str, conn: ConnectionId) -> bool {
        let mut peers = self.lock();
        match peers.get(id) {
            Some(peer) if peer.connection_id() == conn => {
                if let Some(peer) = peers.remove(id) {
                    peer.deactivate();
                }
                true
            }
            _ => false,
        }
    }

    /// Returns the peer registered under `id`.
    pub fn lookup(&self, id: &str) -> Option<Arc<Peer<C>>> {
        self.lock().get(id).cloned()
    }

    /// Returns `true` if `id` is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    /// Every registered identifier at this instant, sorted.
    pub fn snapshot_ids(&self) -> Vec<ClientId> {
        let mut ids: Vec<ClientId> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Every registered `(identifier, peer)` pair at this instant.
    pub fn snapshot_all(&self) -> Vec<(ClientId, Arc<Peer<C>>)> {
        self.lock()
            .iter()
            .map(|(id, peer)| (id.clone(), Arc::clone(peer)))
            .collect()
    }

    /// Empties the registry and returns the peers that were in it.
    pub fn drain(&self) -> Vec<Arc<Peer<C>>> {
        let mut peers = self.lock();
        peers
            .drain()
            .map(|(_, peer)| {
                peer.deactivate();
                peer
            })
            .collect()
    }

    /// Number of registered peers.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if nobody is registered.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ClientId, Arc<Peer<C>>>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<C: Connection> Default for Registry<C> {
    fn default() -> Self {
        Self::new()
    }
}
