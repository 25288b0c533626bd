//! Operator message injection.
//!
//! The admin injector reads lines from the daemon's controlling terminal
//! and broadcasts each one to every connected peer. Nobody is excluded.
//! EOF on the input ends the injector only; the listener and existing
//! sessions keep running.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use relay_core::Message;
use relay_protocol::DELIMITER;

use crate::broadcast::Broadcaster;

/// Broadcasts operator input to all peers.
pub struct AdminInjector {
    broadcaster: Broadcaster,
    max_frame_len: usize,
}

impl AdminInjector {
    pub fn new(broadcaster: Broadcaster, max_frame_len: usize) -> Self {
        Self {
            broadcaster,
            max_frame_len,
        }
    }

    /// Reads `input` line by line until EOF, a read error, or cancellation.
    ///
    /// Blank lines and lines longer than the frame limit are skipped.
    /// Returns the number of lines broadcast.
    pub async fn run<R>(self, input: R, cancel_token: CancellationToken) -> u64
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.split(DELIMITER);
        let mut injected = 0;

        loop {
            let next = tokio::select! {
                _ = cancel_token.cancelled() => {
                    debug!("Admin injector shutting down");
                    break;
                }
                next = lines.next_segment() => next,
            };

            let mut line = match next {
                Ok(Some(line)) => line,
                Ok(None) => {
                    info!("Admin input closed");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read admin input");
                    break;
                }
            };

            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            if line.len() > self.max_frame_len {
                warn!(
                    size = line.len(),
                    max = self.max_frame_len,
                    "Admin line too long, not broadcast"
                );
                continue;
            }

            let report = self.broadcaster.broadcast(Message::from(line), None).await;
            injected += 1;
            info!(delivered = report.delivered, "Broadcast admin message");
        }

        injected
    }
}
