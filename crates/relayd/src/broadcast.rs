//! Fan-out of messages to registered peers.
//!
//! The broadcaster never writes to a socket. It places the message on each
//! recipient's outbound queue:
//! - queue accepted the message: delivered
//! - queue full: wait up to the stall timeout for the peer's writer to make
//!   room; a burst from a fast sender is absorbed this way
//! - queue still full after the stall timeout: the peer is not draining; it
//!   is evicted
//! - queue closed: the peer's writer already stopped; it is unregistered
//!
//! Waiting on a full queue holds up only the sending session, and for at
//! most the stall timeout per recipient. A failure for one peer never stops
//! delivery to the others.

use std::time::Duration;

use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tracing::{debug, trace, warn};

use relay_core::config::DEFAULT_STALL_TIMEOUT_MS;
use relay_core::{Message, PeerId};

use crate::registry::{ConnectionRegistry, PeerHandle};

/// Outcome of a single broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Peers whose queue accepted the message
    pub delivered: usize,

    /// Peers evicted because their queue stayed full past the stall timeout
    pub evicted: Vec<PeerId>,

    /// Peers unregistered because their queue was already closed
    pub dropped: Vec<PeerId>,
}

/// Delivers messages to every registered peer except an optional sender.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: ConnectionRegistry,
    stall_timeout: Duration,
}

impl Broadcaster {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self {
            registry,
            stall_timeout: Duration::from_millis(DEFAULT_STALL_TIMEOUT_MS),
        }
    }

    /// Sets how long a full queue may block delivery before its peer is evicted.
    #[must_use]
    pub fn with_stall_timeout(mut self, stall_timeout: Duration) -> Self {
        self.stall_timeout = stall_timeout;
        self
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Sends `msg` to all peers in a registry snapshot except `exclude`.
    ///
    /// Admin broadcasts pass `None` and reach everyone.
    pub async fn broadcast(&self, msg: Message, exclude: Option<PeerId>) -> BroadcastReport {
        let peers = self.registry.snapshot().await;
        let mut report = BroadcastReport::default();

        for peer in peers.iter().filter(|p| Some(p.id()) != exclude) {
            let queued = match peer.try_enqueue(msg.clone()) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(msg)) => {
                    trace!(peer = %peer.id(), "Peer outbound queue full, waiting");
                    peer.enqueue_timeout(msg, self.stall_timeout).await
                }
                Err(TrySendError::Closed(msg)) => Err(SendTimeoutError::Closed(msg)),
            };

            match queued {
                Ok(()) => report.delivered += 1,
                Err(SendTimeoutError::Timeout(_)) => {
                    warn!(
                        peer = %peer.id(),
                        addr = %peer.addr(),
                        stall_ms = self.stall_timeout.as_millis() as u64,
                        "Peer outbound queue stalled, evicting"
                    );
                    self.evict(peer).await;
                    report.evicted.push(peer.id());
                }
                Err(SendTimeoutError::Closed(_)) => {
                    debug!(peer = %peer.id(), "Peer outbound queue closed");
                    self.evict(peer).await;
                    report.dropped.push(peer.id());
                }
            }
        }

        debug!(
            sender = ?exclude,
            bytes = msg.len(),
            delivered = report.delivered,
            "Broadcast message"
        );

        report
    }

    async fn evict(&self, peer: &PeerHandle) {
        self.registry.remove(peer.id()).await;
        peer.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    async fn register(
        registry: &ConnectionRegistry,
        id: u64,
        capacity: usize,
    ) -> (PeerHandle, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity);
        let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let peer = PeerHandle::new(PeerId::new(id), addr, tx, CancellationToken::new());
        registry.add(peer.clone()).await;
        (peer, rx)
    }

    #[tokio::test]
    async fn test_sender_excluded() {
        let registry = ConnectionRegistry::new();
        let (_a, mut rx_a) = register(&registry, 1, 8).await;
        let (_b, mut rx_b) = register(&registry, 2, 8).await;
        let (_c, mut rx_c) = register(&registry, 3, 8).await;

        let broadcaster = Broadcaster::new(registry);
        let report = broadcaster
            .broadcast(Message::from("hi"), Some(PeerId::new(1)))
            .await;

        assert_eq!(report.delivered, 2);
        assert_eq!(rx_b.recv().await, Some(Message::from("hi")));
        assert_eq!(rx_c.recv().await, Some(Message::from("hi")));
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_no_exclusion_reaches_everyone() {
        let registry = ConnectionRegistry::new();
        let (_a, mut rx_a) = register(&registry, 1, 8).await;
        let (_b, mut rx_b) = register(&registry, 2, 8).await;

        let broadcaster = Broadcaster::new(registry);
        let report = broadcaster.broadcast(Message::from("notice"), None).await;

        assert_eq!(report.delivered, 2);
        assert_eq!(rx_a.recv().await, Some(Message::from("notice")));
        assert_eq!(rx_b.recv().await, Some(Message::from("notice")));
    }

    #[tokio::test]
    async fn test_stalled_queue_evicts_only_that_peer() {
        let registry = ConnectionRegistry::new();
        let (slow, _rx_slow) = register(&registry, 1, 1).await;
        let (_fast, mut rx_fast) = register(&registry, 2, 8).await;

        let broadcaster =
            Broadcaster::new(registry.clone()).with_stall_timeout(Duration::from_millis(20));
        broadcaster.broadcast(Message::from("one"), None).await;
        let report = broadcaster.broadcast(Message::from("two"), None).await;

        assert_eq!(report.evicted, vec![PeerId::new(1)]);
        assert_eq!(report.delivered, 1);
        assert!(slow.is_closed());
        assert!(!registry.contains(PeerId::new(1)).await);

        assert_eq!(rx_fast.recv().await, Some(Message::from("one")));
        assert_eq!(rx_fast.recv().await, Some(Message::from("two")));
    }

    #[tokio::test]
    async fn test_full_queue_of_draining_peer_is_not_evicted() {
        let registry = ConnectionRegistry::new();
        let (_sender, _rx_sender) = register(&registry, 1, 4).await;
        let (reader, mut rx) = register(&registry, 2, 2).await;

        // Drains slower than the broadcasts arrive
        let drain = tokio::spawn(async move {
            let mut got = Vec::new();
            while got.len() < 50 {
                tokio::time::sleep(Duration::from_millis(1)).await;
                match rx.recv().await {
                    Some(msg) => got.push(msg),
                    None => break,
                }
            }
            got
        });

        let broadcaster = Broadcaster::new(registry.clone());
        for i in 0..50 {
            let report = broadcaster
                .broadcast(Message::from(format!("m{i}")), Some(PeerId::new(1)))
                .await;
            assert_eq!(report.delivered, 1);
            assert!(report.evicted.is_empty());
        }

        let got = drain.await.unwrap();
        let expected: Vec<Message> = (0..50).map(|i| Message::from(format!("m{i}"))).collect();
        assert_eq!(got, expected);
        assert!(!reader.is_closed());
        assert!(registry.contains(PeerId::new(2)).await);
    }

    #[tokio::test]
    async fn test_closed_queue_is_unregistered() {
        let registry = ConnectionRegistry::new();
        let (_gone, rx_gone) = register(&registry, 1, 8).await;
        let (_live, mut rx_live) = register(&registry, 2, 8).await;
        drop(rx_gone);

        let broadcaster = Broadcaster::new(registry.clone());
        let report = broadcaster.broadcast(Message::from("still here"), None).await;

        assert_eq!(report.dropped, vec![PeerId::new(1)]);
        assert_eq!(registry.len().await, 1);
        assert_eq!(rx_live.recv().await, Some(Message::from("still here")));
    }

    #[tokio::test]
    async fn test_per_sender_order_preserved() {
        let registry = ConnectionRegistry::new();
        let (_sender, _rx_sender) = register(&registry, 1, 64).await;
        let (_recv, mut rx) = register(&registry, 2, 64).await;

        let broadcaster = Broadcaster::new(registry);
        for i in 0..20 {
            broadcaster
                .broadcast(Message::from(format!("m{i}")), Some(PeerId::new(1)))
                .await;
        }

        for i in 0..20 {
            assert_eq!(rx.recv().await, Some(Message::from(format!("m{i}"))));
        }
    }

    #[tokio::test]
    async fn test_empty_registry() {
        let broadcaster = Broadcaster::new(ConnectionRegistry::new());
        let report = broadcaster.broadcast(Message::from("void"), None).await;
        assert_eq!(report, BroadcastReport::default());
    }
}
