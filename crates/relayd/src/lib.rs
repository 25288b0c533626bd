//! relay daemon - connection registry and broadcast server
//!
//! This crate provides the server side of relay chat:
//! - `registry` - live set of connected peers eligible for fan-out
//! - `broadcast` - fan-out of one message to every peer but the sender
//! - `server` - TCP listener and per-connection session handling
//! - `admin` - operator input broadcast to all peers
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        relayd daemon                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │   RelayServer   │────▶│     ConnectionRegistry      │   │
//! │  │  (TcpListener)  │     │  (PeerId -> PeerHandle)     │   │
//! │  └────────┬────────┘     └──────────────▲──────────────┘   │
//! │           │ spawn                       │ snapshot          │
//! │           ▼                             │                   │
//! │  ┌─────────────────┐     ┌──────────────┴──────────────┐   │
//! │  │ConnectionHandler│────▶│        Broadcaster          │   │
//! │  │  (per peer)     │     │  (enqueue to peer writers)  │   │
//! │  └─────────────────┘     └──────────────▲──────────────┘   │
//! │                                         │                   │
//! │                          ┌──────────────┴──────────────┐   │
//! │                          │       AdminInjector         │   │
//! │                          │          (stdin)            │   │
//! │                          └─────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod admin;
pub mod broadcast;
pub mod registry;
pub mod server;

pub use admin::AdminInjector;
pub use broadcast::{BroadcastReport, Broadcaster};
pub use registry::{ConnectionRegistry, PeerHandle};
pub use server::{ConnectionError, DisconnectReason, RelayServer, ServerError};
