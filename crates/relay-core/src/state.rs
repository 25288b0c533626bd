//! Connection lifecycle shared by server sessions and the client.
//!
//! ```text
//! CONNECTING ──▶ OPEN ──▶ CLOSING ──▶ CLOSED
//!      │                    ▲
//!      └────────────────────┘   (connect failure)
//! ```
//!
//! `CLOSED` is terminal; there is no reconnection.

use std::fmt;

use crate::error::StateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ConnectionState {
    /// Returns true if `next` is a legal successor of `self`.
    ///
    /// Re-entering the current state is allowed (several triggers may race to
    /// start closing), except for `Closed`, which accepts nothing.
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Connecting, Connecting)
                | (Connecting, Open)
                | (Connecting, Closing)
                | (Open, Open)
                | (Open, Closing)
                | (Closing, Closing)
                | (Closing, Closed)
        )
    }

    /// Moves to `next`, or reports the illegal transition.
    pub fn advance(&mut self, next: ConnectionState) -> Result<(), StateError> {
        if !self.can_transition_to(next) {
            return Err(StateError::InvalidTransition {
                from: *self,
                to: next,
            });
        }
        *self = next;
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        *self == ConnectionState::Open
    }

    pub fn is_terminal(&self) -> bool {
        *self == ConnectionState::Closed
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Open => "OPEN",
            ConnectionState::Closing => "CLOSING",
            ConnectionState::Closed => "CLOSED",
        };
        f.write_str(s)
    }
}
