//! Interactive chat session against a relay daemon.
//!
//! A session runs two loops over one connection:
//! - the receive loop (background task) writes each inbound message to the
//!   output on its own line; on EOF or error it prints
//!   [`DISCONNECT_NOTICE`] and stops, leaving the send loop in control
//! - the send loop reads local lines and sends them as `"{name}: {line}"`
//!   until the user types [`EXIT_COMMAND`], input ends, or a write fails
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use relay_core::{validate_name, ClientConfig, ConnectionState, Message};
use relay_protocol::MessageCodec;

use crate::error::{ClientError, Result};

/// Local command that ends the session without being sent.
pub const EXIT_COMMAND: &str = "exit";

/// Printed by the receive loop when the server connection ends.
pub const DISCONNECT_NOTICE: &str = "Disconnected from server.";

/// How a session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// User typed the exit command
    Exit,

    /// Local input reached EOF
    InputClosed,

    /// Server closed the connection
    Disconnected,
}

/// A connected chat session.
pub struct ClientSession {
    name: String,
    max_frame_len: usize,
    reader: FramedRead<OwnedReadHalf, MessageCodec>,
    writer: FramedWrite<OwnedWriteHalf, MessageCodec>,
    state: Arc<watch::Sender<ConnectionState>>,
}

impl ClientSession {
    /// Connects to the server named by `config`.
    ///
    /// The display name is taken from `config.name`; use
    /// [`ClientSession::with_name`] to set one afterwards.
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        config.validate()?;
        let name = display_name(config.name.as_deref().unwrap_or_default())?;

        let (state, _) = watch::channel(ConnectionState::Connecting);
        let state = Arc::new(state);

        let addr = config.server_addr();
        let stream = TcpStream::connect(&addr).await.map_err(|e| {
            advance(&state, ConnectionState::Closing);
            advance(&state, ConnectionState::Closed);
            ClientError::Connect {
                addr: addr.clone(),
                error: e.to_string(),
            }
        })?;

        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }

        let (read_half, write_half) = stream.into_split();
        advance(&state, ConnectionState::Open);
        info!(addr = %addr, "Connected to server");

        Ok(Self {
            name,
            max_frame_len: config.max_frame_len,
            reader: FramedRead::new(read_half, MessageCodec::new(config.max_frame_len)),
            writer: FramedWrite::new(write_half, MessageCodec::new(config.max_frame_len)),
            state,
        })
    }

    /// Sets the display name prefixed to outgoing lines.
    ///
    /// Surrounding whitespace is trimmed; a name spanning several lines is
    /// rejected.
    pub fn with_name(mut self, name: impl AsRef<str>) -> Result<Self> {
        self.name = display_name(name.as_ref())?;
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Watch channel tracking the connection state.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Runs the session until exit, input EOF, disconnect, or a send failure.
    ///
    /// Inbound messages and the disconnect notice are written to `output`.
    pub async fn run<I, O>(self, input: I, output: O) -> Result<SessionEnd>
    where
        I: AsyncBufRead + Unpin,
        O: AsyncWrite + Unpin + Send + 'static,
    {
        let Self {
            name,
            max_frame_len,
            reader,
            mut writer,
            state,
        } = self;

        let disconnected = CancellationToken::new();
        let stop = CancellationToken::new();

        let receiver = tokio::spawn(receive_loop(
            reader,
            output,
            Arc::clone(&state),
            disconnected.clone(),
            stop.clone(),
        ));

        let mut lines = input.lines();
        let end = loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break Ok(SessionEnd::InputClosed),
                Err(e) => break Err(ClientError::Input(e)),
            };

            if disconnected.is_cancelled() {
                break Ok(SessionEnd::Disconnected);
            }
            if line.trim().eq_ignore_ascii_case(EXIT_COMMAND) {
                break Ok(SessionEnd::Exit);
            }
            if line.is_empty() {
                continue;
            }

            let msg = Message::from_named(&name, &line);
            if msg.len() > max_frame_len {
                warn!(size = msg.len(), max = max_frame_len, "Message too long, not sent");
                continue;
            }

            if let Err(e) = writer.send(msg).await {
                break Err(ClientError::Send(e));
            }
        };

        advance(&state, ConnectionState::Closing);
        stop.cancel();
        if let Err(e) = receiver.await {
            warn!(error = %e, "Receive loop aborted");
        }
        drop(writer);
        advance(&state, ConnectionState::Closed);

        debug!(end = ?end, "Session ended");
        end
    }
}

/// Prints inbound messages until EOF, error, or a local stop.
async fn receive_loop<O>(
    mut reader: FramedRead<OwnedReadHalf, MessageCodec>,
    mut output: O,
    state: Arc<watch::Sender<ConnectionState>>,
    disconnected: CancellationToken,
    stop: CancellationToken,
) where
    O: AsyncWrite + Unpin,
{
    loop {
        let frame = tokio::select! {
            _ = stop.cancelled() => return,
            frame = reader.next() => frame,
        };

        match frame {
            Some(Ok(msg)) => {
                if let Err(e) = print_line(&mut output, msg.as_bytes()).await {
                    debug!(error = %e, "Failed to write inbound message");
                    break;
                }
            }
            Some(Err(e)) => {
                debug!(error = %e, "Receive failed");
                break;
            }
            None => {
                debug!("Server closed the connection");
                break;
            }
        }
    }

    advance(&state, ConnectionState::Closing);
    disconnected.cancel();
    if let Err(e) = print_line(&mut output, DISCONNECT_NOTICE.as_bytes()).await {
        debug!(error = %e, "Failed to write disconnect notice");
    }
}

async fn print_line<O>(output: &mut O, line: &[u8]) -> std::io::Result<()>
where
    O: AsyncWrite + Unpin,
{
    output.write_all(line).await?;
    output.write_all(b"\n").await?;
    output.flush().await
}

fn display_name(raw: &str) -> Result<String> {
    let name = raw.trim();
    validate_name(name)?;
    Ok(name.to_string())
}

fn advance(state: &watch::Sender<ConnectionState>, next: ConnectionState) {
    state.send_if_modified(|current| {
        let from = *current;
        match current.advance(next) {
            Ok(()) => from != next,
            Err(e) => {
                debug!(error = %e, "Ignoring client state change");
                false
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_updates_watch() {
        let (tx, rx) = watch::channel(ConnectionState::Connecting);
        advance(&tx, ConnectionState::Open);
        assert_eq!(*rx.borrow(), ConnectionState::Open);
    }

    #[test]
    fn test_advance_ignores_illegal_transition() {
        let (tx, rx) = watch::channel(ConnectionState::Closed);
        advance(&tx, ConnectionState::Open);
        assert_eq!(*rx.borrow(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to get a port nobody listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = ClientConfig {
            host: "127.0.0.1".to_string(),
            port,
            ..Default::default()
        };
        let err = ClientSession::connect(&config).await.err().unwrap();
        assert!(matches!(err, ClientError::Connect { .. }));
    }

    #[tokio::test]
    async fn test_with_name_trims() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ClientConfig {
            host: "127.0.0.1".to_string(),
            port: listener.local_addr().unwrap().port(),
            ..Default::default()
        };
        let session = ClientSession::connect(&config)
            .await
            .unwrap()
            .with_name("  bob \n")
            .unwrap();
        assert_eq!(session.name(), "bob");
        assert_eq!(*session.state().borrow(), ConnectionState::Open);
    }

    #[tokio::test]
    async fn test_configured_name_is_trimmed() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ClientConfig {
            host: "127.0.0.1".to_string(),
            port: listener.local_addr().unwrap().port(),
            name: Some(" alice\n".to_string()),
            ..Default::default()
        };
        let session = ClientSession::connect(&config).await.unwrap();
        assert_eq!(session.name(), "alice");
    }

    #[tokio::test]
    async fn test_multiline_name_rejected() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ClientConfig {
            host: "127.0.0.1".to_string(),
            port: listener.local_addr().unwrap().port(),
            name: Some("ali\nce".to_string()),
            ..Default::default()
        };
        let err = ClientSession::connect(&config).await.err().unwrap();
        assert!(matches!(err, ClientError::Config(_)));

        let config = ClientConfig {
            name: None,
            ..config
        };
        let session = ClientSession::connect(&config).await.unwrap();
        assert!(matches!(
            session.with_name("bob\rby"),
            Err(ClientError::Config(_))
        ));
    }
}
