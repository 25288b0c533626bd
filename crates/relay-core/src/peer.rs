//! Peer identity.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for an accepted connection.
///
/// Assigned at accept time from a [`PeerIdAllocator`] and never reused for
/// the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(u64);

impl PeerId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// Monotonic source of [`PeerId`]s.
#[derive(Debug, Default)]
pub struct PeerIdAllocator {
    next: AtomicU64,
}

impl PeerIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next unused identifier.
    pub fn next_id(&self) -> PeerId {
        PeerId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}
