//! relay core - shared types for the broadcast chat server and client
//!
//! This crate provides the domain types shared between the daemon
//! (relayd) and the terminal client (relay).
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod config;
pub mod error;
pub mod message;
pub mod peer;
pub mod state;

// Re-exports for convenience
pub use config::{validate_name, ClientConfig, RelayConfig, ServerConfig, DEFAULT_PORT};
pub use error::{ConfigError, StateError};
pub use message::Message;
pub use peer::{PeerId, PeerIdAllocator};
pub use state::ConnectionState;
