//! TCP listener for the relay daemon.
//!
//! The server:
//! - Binds the configured address (failure is fatal to the caller)
//! - Registers each accepted connection before its session starts
//! - Spawns a ConnectionHandler per connection
//! - Supports graceful shutdown via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   RelayServer   │
//! │                 │
//! │   TcpListener   │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐  register   ┌────────────────────┐
//! │ConnectionHandler│────────────▶│ ConnectionRegistry │
//! │   (per peer)    │             └─────────┬──────────┘
//! └───────┬─────────┘                       │ snapshot
//!         │ broadcast                       ▼
//!         └────────────────────────▶┌─────────────────┐
//!                                   │   Broadcaster   │──▶ peer queues
//!                                   └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Accept errors are logged and allow continued operation

mod connection;

pub use connection::{ConnectionError, ConnectionHandler, DisconnectReason};

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use relay_core::{ConfigError, PeerIdAllocator, ServerConfig};

use crate::broadcast::Broadcaster;
use crate::registry::ConnectionRegistry;

/// Pause after a failed accept (e.g. file descriptor exhaustion)
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Listening relay server.
pub struct RelayServer {
    config: ServerConfig,
    listener: TcpListener,
    registry: ConnectionRegistry,
    broadcaster: Broadcaster,
    peer_ids: PeerIdAllocator,
    cancel_token: CancellationToken,
}

impl RelayServer {
    /// Validates the config and binds the listening socket.
    ///
    /// # Arguments
    ///
    /// * `config` - Bind address and per-connection limits
    /// * `cancel_token` - Token for graceful shutdown
    pub async fn bind(
        config: ServerConfig,
        cancel_token: CancellationToken,
    ) -> Result<Self, ServerError> {
        config.validate()?;

        let addr = config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.clone(),
                error: e.to_string(),
            })?;

        let registry = ConnectionRegistry::new();
        let broadcaster =
            Broadcaster::new(registry.clone()).with_stall_timeout(config.stall_timeout());

        Ok(Self {
            config,
            listener,
            registry,
            broadcaster,
            peer_ids: PeerIdAllocator::new(),
            cancel_token,
        })
    }

    /// Address actually bound (resolves port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener
            .local_addr()
            .map_err(|e| ServerError::LocalAddr(e.to_string()))
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> ConnectionRegistry {
        self.registry.clone()
    }

    pub fn broadcaster(&self) -> Broadcaster {
        self.broadcaster.clone()
    }

    /// Runs the accept loop.
    ///
    /// Does not return until the cancellation token is triggered.
    pub async fn run(self) {
        match self.listener.local_addr() {
            Ok(addr) => info!(addr = %addr, "Server started. Waiting for connections..."),
            Err(_) => info!("Server started. Waiting for connections..."),
        }

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            self.handle_connection(stream, addr).await;
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                            sleep(ACCEPT_ERROR_BACKOFF).await;
                        }
                    }
                }
            }
        }

        self.cleanup().await;
    }

    /// Registers the connection, then spawns its session.
    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let id = self.peer_ids.next_id();

        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %id, error = %e, "Failed to set TCP_NODELAY");
        }

        let handler = ConnectionHandler::new(
            id,
            addr,
            stream,
            &self.config,
            self.broadcaster.clone(),
            self.cancel_token.child_token(),
        );

        if !self.registry.add(handler.peer_handle()).await {
            warn!(peer = %id, "Peer id already registered, dropping connection");
            return;
        }

        tokio::spawn(handler.run());
    }

    async fn cleanup(&self) {
        let closed = self.registry.close_all().await;
        info!(closed, "Server cleanup complete");
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {error}")]
    Bind { addr: String, error: String },

    #[error("Failed to read local address: {0}")]
    LocalAddr(String),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}
