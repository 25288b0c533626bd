//! relay client - terminal chat session library
//!
//! This crate provides the [`ClientSession`], which connects to a relay
//! daemon, prints inbound messages from a background receive loop, and sends
//! lines typed locally until the user types `exit`.
//!
//! **Panic-Free Policy:** This crate follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

pub mod error;
pub mod session;

pub use error::{ClientError, Result};
pub use session::{ClientSession, SessionEnd, DISCONNECT_NOTICE, EXIT_COMMAND};
