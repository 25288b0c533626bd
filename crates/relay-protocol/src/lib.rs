//! relay protocol - wire framing for chat connections
//!
//! Connections carry newline-delimited frames. Each frame is one opaque
//! [`relay_core::Message`]; the framing layer neither inspects nor rewrites
//! payloads.
//!
//! Framing policy:
//! - a message split across several socket reads is reassembled into one frame
//! - several messages arriving in one read are split into several frames
//! - a trailing `\r` before the delimiter is dropped, so CRLF clients work
//! - unterminated bytes still buffered at EOF form a final frame
//! - frames longer than the configured maximum are a transport error

pub mod codec;

pub use codec::{FrameError, MessageCodec, DELIMITER};
