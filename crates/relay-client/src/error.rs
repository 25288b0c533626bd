//! Error types for the relay client.

use std::io;
use thiserror::Error;

use relay_core::ConfigError;
use relay_protocol::FrameError;

// ============================================================================
// Client Error Type
// ============================================================================

/// Client session errors.
///
/// A server-side disconnect is not an error; it ends the session with
/// [`crate::SessionEnd::Disconnected`].
#[derive(Error, Debug)]
pub enum ClientError {
    /// Failed to reach the server.
    ///
    /// Usually the daemon is not running or the host/port is wrong.
    #[error("Failed to connect to {addr}: {error}")]
    Connect { addr: String, error: String },

    /// Writing an outbound message failed; the session is over.
    #[error("Error sending message: {0}")]
    Send(#[source] FrameError),

    /// Local input could not be read.
    #[error("Failed to read input: {0}")]
    Input(#[from] io::Error),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Convenience Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
