//! Chat message payloads.
//!
//! A [`Message`] is an opaque byte payload. Text content such as
//! `"alice: hello"` is a convention of the client, never enforced here.

use std::borrow::Cow;
use std::fmt;

use bytes::Bytes;

/// One relayed unit of chat traffic.
///
/// Cloning is cheap (reference counted), so a single broadcast can hand the
/// same payload to every peer queue.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Message(Bytes);

impl Message {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self(payload.into())
    }

    /// Builds the `"{name}: {text}"` form used by interactive clients.
    ///
    /// An empty name yields the text unchanged.
    pub fn from_named(name: &str, text: &str) -> Self {
        if name.is_empty() {
            Self::from(text)
        } else {
            Self::from(format!("{name}: {text}"))
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Payload as text, replacing invalid UTF-8 sequences.
    pub fn to_text_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.0)
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Message").field(&self.to_text_lossy()).finish()
    }
}

impl From<Bytes> for Message {
    fn from(b: Bytes) -> Self {
        Self(b)
    }
}

impl From<Vec<u8>> for Message {
    fn from(v: Vec<u8>) -> Self {
        Self(Bytes::from(v))
    }
}

impl From<String> for Message {
    fn from(s: String) -> Self {
        Self(Bytes::from(s))
    }
}

impl From<&str> for Message {
    fn from(s: &str) -> Self {
        Self(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl AsRef<[u8]> for Message {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
