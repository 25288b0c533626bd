//! Per-connection session handling.
//!
//! Each accepted connection is split in two:
//! - `ConnectionHandler` owns the read half. It decodes frames and hands each
//!   message to the broadcaster with itself excluded.
//! - `PeerWriter` owns the write half. It is the only task that writes to the
//!   socket, draining the peer's outbound queue in order.
//!
//! Either side ending cancels the connection's close token, which stops the
//! other. Teardown unregisters the peer (a no-op if an eviction got there
//! first) and waits for the writer to release the socket.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Connection errors are logged and result in teardown of that connection only

use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use relay_core::{ConnectionState, Message, PeerId, ServerConfig};
use relay_protocol::{FrameError, MessageCodec};

use crate::broadcast::Broadcaster;
use crate::registry::PeerHandle;

/// Why a session ended.
#[derive(Debug)]
pub enum DisconnectReason {
    /// Peer closed its side (EOF)
    PeerClosed,

    /// Transport failure on read or write
    Failed(ConnectionError),

    /// Closed from the server side: eviction or shutdown
    Closed,
}

/// Transport errors scoped to a single connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Read failed: {0}")]
    Read(#[source] FrameError),

    #[error("Write failed: {0}")]
    Write(#[source] FrameError),
}

/// Session handler for a single accepted connection.
///
/// Generic over the transport halves; the server uses the split halves of a
/// `TcpStream`.
pub struct ConnectionHandler<R = OwnedReadHalf, W = OwnedWriteHalf> {
    id: PeerId,
    addr: SocketAddr,
    reader: FramedRead<R, MessageCodec>,

    /// Taken and spawned when the session starts
    writer: Option<PeerWriter<W>>,

    /// Registry entry for this connection
    handle: PeerHandle,
    broadcaster: Broadcaster,
    closer: CancellationToken,
    state: ConnectionState,
    connected_at: DateTime<Utc>,
}

impl ConnectionHandler {
    /// Creates a handler for an accepted stream.
    ///
    /// Nothing is read or written until [`ConnectionHandler::run`]; messages
    /// queued for the peer in the meantime are buffered.
    ///
    /// # Arguments
    ///
    /// * `id` - Identifier assigned at accept time
    /// * `addr` - Remote address, informational only
    /// * `stream` - The accepted stream
    /// * `config` - Frame limit and queue depth
    /// * `broadcaster` - Fan-out for inbound messages
    /// * `closer` - Token that tears this session down when cancelled
    pub fn new(
        id: PeerId,
        addr: SocketAddr,
        stream: TcpStream,
        config: &ServerConfig,
        broadcaster: Broadcaster,
        closer: CancellationToken,
    ) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self::from_parts(id, addr, read_half, write_half, config, broadcaster, closer)
    }
}

impl<R, W> ConnectionHandler<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Creates a handler over separate read and write halves.
    pub fn from_parts(
        id: PeerId,
        addr: SocketAddr,
        reader: R,
        writer: W,
        config: &ServerConfig,
        broadcaster: Broadcaster,
        closer: CancellationToken,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity);

        let writer = PeerWriter {
            id,
            outbound: outbound_rx,
            sink: FramedWrite::new(writer, MessageCodec::new(config.max_frame_len)),
            closer: closer.clone(),
        };

        Self {
            id,
            addr,
            reader: FramedRead::new(reader, MessageCodec::new(config.max_frame_len)),
            writer: Some(writer),
            handle: PeerHandle::new(id, addr, outbound_tx, closer.clone()),
            broadcaster,
            closer,
            state: ConnectionState::Connecting,
            connected_at: Utc::now(),
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Handle to register before the session is started.
    pub fn peer_handle(&self) -> PeerHandle {
        self.handle.clone()
    }

    /// Runs the session until EOF, a transport error, or a close signal.
    pub async fn run(mut self) -> DisconnectReason {
        self.transition(ConnectionState::Open);
        info!(peer = %self.id, addr = %self.addr, "Peer connected");

        let writer_task = self.writer.take().map(|w| tokio::spawn(w.run()));

        let mut reason = self.read_loop().await;

        self.transition(ConnectionState::Closing);
        self.broadcaster.registry().remove(self.id).await;
        self.closer.cancel();

        if let Some(task) = writer_task {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    // A write failure is what closed the session
                    if matches!(reason, DisconnectReason::Closed) {
                        reason = DisconnectReason::Failed(e);
                    }
                }
                Err(e) => warn!(peer = %self.id, error = %e, "Writer task aborted"),
            }
        }

        self.transition(ConnectionState::Closed);

        let connected_ms = (Utc::now() - self.connected_at).num_milliseconds();
        match &reason {
            DisconnectReason::PeerClosed => {
                info!(peer = %self.id, addr = %self.addr, connected_ms, "Peer disconnected");
            }
            DisconnectReason::Failed(e) => {
                warn!(peer = %self.id, addr = %self.addr, connected_ms, error = %e, "Peer connection failed");
            }
            DisconnectReason::Closed => {
                info!(peer = %self.id, addr = %self.addr, connected_ms, "Peer connection closed by server");
            }
        }

        reason
    }

    async fn read_loop(&mut self) -> DisconnectReason {
        loop {
            let frame = tokio::select! {
                _ = self.closer.cancelled() => return DisconnectReason::Closed,
                frame = self.reader.next() => frame,
            };

            match frame {
                None => return DisconnectReason::PeerClosed,
                Some(Err(e)) => return DisconnectReason::Failed(ConnectionError::Read(e)),
                Some(Ok(msg)) if msg.is_empty() => {
                    trace!(peer = %self.id, "Ignoring empty frame");
                }
                Some(Ok(msg)) => {
                    self.broadcaster.broadcast(msg, Some(self.id)).await;
                }
            }
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        let from = self.state;
        match self.state.advance(next) {
            Ok(()) => debug!(peer = %self.id, %from, to = %next, "Connection state changed"),
            Err(e) => warn!(peer = %self.id, error = %e, "Ignoring connection state change"),
        }
    }
}

/// Sole writer for one peer's socket.
struct PeerWriter<W> {
    id: PeerId,
    outbound: mpsc::Receiver<Message>,
    sink: FramedWrite<W, MessageCodec>,
    closer: CancellationToken,
}

impl<W> PeerWriter<W>
where
    W: AsyncWrite + Unpin,
{
    /// Drains the outbound queue until the close signal fires.
    ///
    /// Pending writes are abandoned on close so a stalled peer cannot hold
    /// up teardown. Dropping the sink shuts down the write half.
    async fn run(mut self) -> Result<(), ConnectionError> {
        loop {
            let msg = tokio::select! {
                _ = self.closer.cancelled() => return Ok(()),
                next = self.outbound.recv() => match next {
                    Some(msg) => msg,
                    None => return Ok(()),
                },
            };

            tokio::select! {
                _ = self.closer.cancelled() => return Ok(()),
                sent = self.sink.send(msg) => {
                    if let Err(e) = sent {
                        trace!(peer = %self.id, error = %e, "Write to peer failed");
                        // Stop the reader too; the handler unregisters on teardown
                        self.closer.cancel();
                        return Err(ConnectionError::Write(e));
                    }
                }
            }
        }
    }
}
