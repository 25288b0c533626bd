//! Newline-delimited message codec.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use relay_core::config::DEFAULT_MAX_FRAME_LEN;
use relay_core::Message;

/// Frame terminator.
pub const DELIMITER: u8 = b'\n';

/// Errors raised while framing a byte stream.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Payload contains the frame delimiter at byte {position}")]
    EmbeddedDelimiter { position: usize },
}

/// Codec turning a byte stream into [`Message`] frames and back.
#[derive(Debug, Clone)]
pub struct MessageCodec {
    max_frame_len: usize,

    /// Bytes of the buffer already scanned for a delimiter.
    next_index: usize,
}

impl MessageCodec {
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            max_frame_len,
            next_index: 0,
        }
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }

    fn take_frame(&mut self, src: &mut BytesMut, len: usize) -> Result<Message, FrameError> {
        let mut frame = src.split_to(len);
        self.next_index = 0;

        if frame.last() == Some(&DELIMITER) {
            frame.truncate(frame.len() - 1);
        }
        if frame.last() == Some(&b'\r') {
            frame.truncate(frame.len() - 1);
        }

        if frame.len() > self.max_frame_len {
            return Err(FrameError::FrameTooLarge {
                size: frame.len(),
                max: self.max_frame_len,
            });
        }

        Ok(Message::from(frame.freeze()))
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, FrameError> {
        let start = self.next_index.min(src.len());

        match src.iter().skip(start).position(|b| *b == DELIMITER) {
            Some(offset) => {
                let len = start + offset + 1;
                self.take_frame(src, len).map(Some)
            }
            None => {
                // A trailing '\r' may be the first half of a CRLF terminator
                let pending = match src.last() {
                    Some(b'\r') => src.len() - 1,
                    _ => src.len(),
                };
                if pending > self.max_frame_len {
                    return Err(FrameError::FrameTooLarge {
                        size: pending,
                        max: self.max_frame_len,
                    });
                }
                self.next_index = src.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Message>, FrameError> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if src.is_empty() {
            return Ok(None);
        }
        let len = src.len();
        self.take_frame(src, len).map(Some)
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = FrameError;

    fn encode(&mut self, msg: Message, dst: &mut BytesMut) -> Result<(), FrameError> {
        let payload = msg.as_bytes();

        if let Some(position) = payload.iter().position(|b| *b == DELIMITER) {
            return Err(FrameError::EmbeddedDelimiter { position });
        }
        if payload.len() > self.max_frame_len {
            return Err(FrameError::FrameTooLarge {
                size: payload.len(),
                max: self.max_frame_len,
            });
        }

        dst.reserve(payload.len() + 1);
        dst.put_slice(payload);
        dst.put_u8(DELIMITER);
        Ok(())
    }
}
