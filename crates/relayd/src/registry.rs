//! Connection registry.
//!
//! The registry is the live set of peers eligible for fan-out. It holds a
//! [`PeerHandle`] per registered connection: the peer's identifier, its
//! outbound queue and its close signal. It never reads from or writes to a
//! socket and never closes one; the owning session handler does that.
//!
//! Every read and mutation happens under one lock. Handles are cloned out by
//! [`ConnectionRegistry::snapshot`] so no lock is held while messages are
//! being enqueued.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use relay_core::{Message, PeerId};

/// Registry-side reference to a connected peer.
///
/// Cloning is cheap. Dropping every clone does not close the connection;
/// the session handler owns the transport.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    id: PeerId,
    addr: SocketAddr,
    outbound: mpsc::Sender<Message>,
    closer: CancellationToken,
}

impl PeerHandle {
    pub fn new(
        id: PeerId,
        addr: SocketAddr,
        outbound: mpsc::Sender<Message>,
        closer: CancellationToken,
    ) -> Self {
        Self {
            id,
            addr,
            outbound,
            closer,
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Queues a message for this peer's writer without waiting.
    pub fn try_enqueue(&self, msg: Message) -> Result<(), TrySendError<Message>> {
        self.outbound.try_send(msg)
    }

    /// Queues a message, waiting up to `timeout` for queue space.
    pub async fn enqueue_timeout(
        &self,
        msg: Message,
        timeout: Duration,
    ) -> Result<(), SendTimeoutError<Message>> {
        self.outbound.send_timeout(msg, timeout).await
    }

    /// Signals the owning session to tear down.
    pub fn close(&self) {
        self.closer.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closer.is_cancelled()
    }
}

/// Thread-safe set of registered peers.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    peers: Arc<Mutex<HashMap<PeerId, PeerHandle>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a peer. Returns false if the id was already present.
    pub async fn add(&self, peer: PeerHandle) -> bool {
        let mut peers = self.peers.lock().await;
        if peers.contains_key(&peer.id) {
            return false;
        }
        debug!(peer = %peer.id, addr = %peer.addr, "Registered peer");
        peers.insert(peer.id, peer);
        true
    }

    /// Removes a peer.
    ///
    /// Removing an absent peer is a no-op returning `None`; teardown and
    /// eviction may race to remove the same entry.
    pub async fn remove(&self, id: PeerId) -> Option<PeerHandle> {
        let removed = self.peers.lock().await.remove(&id);
        match removed {
            Some(_) => debug!(peer = %id, "Unregistered peer"),
            None => debug!(peer = %id, "Peer already unregistered"),
        }
        removed
    }

    /// Copies out the current set of peers, in no particular order.
    pub async fn snapshot(&self) -> Vec<PeerHandle> {
        self.peers.lock().await.values().cloned().collect()
    }

    /// Signals every registered peer to close and empties the registry.
    pub async fn close_all(&self) -> usize {
        let drained: Vec<PeerHandle> = {
            let mut peers = self.peers.lock().await;
            peers.drain().map(|(_, peer)| peer).collect()
        };
        for peer in &drained {
            peer.close();
        }
        drained.len()
    }
}
