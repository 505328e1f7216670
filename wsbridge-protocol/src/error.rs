//! Protocol error types.

use std::io;
use thiserror::Error;

/// Errors raised by the handshake upgrader and the frame codec.
///
/// Every variant is terminal for the operation that produced it: a failed
/// handshake aborts connection setup and a failed read or write means the
/// connection should be closed by its owner.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("protocol mismatch: {0}")]
    ProtocolMismatch(&'static str),

    #[error("missing Sec-WebSocket-Key header")]
    MissingKey,

    #[error("connection cannot be hijacked")]
    HijackUnavailable,

    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("truncated frame: stream ended while reading {0}")]
    TruncatedFrame(&'static str),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u64, max: u64 },

    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: u64, max: u64 },

    #[error("received unmasked frame from client")]
    UnmaskedFrame,
}

impl ProtocolError {
    /// Maps an I/O error hit while reading part of a frame.
    ///
    /// A short read surfaces as `UnexpectedEof` from `read_exact`; that is a
    /// truncated frame rather than a transport failure.
    pub(crate) fn from_read(err: io::Error, part: &'static str) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            ProtocolError::TruncatedFrame(part)
        } else {
            ProtocolError::Transport(err)
        }
    }

    /// Returns whether the error was caused by what the peer sent during the
    /// opening handshake, as opposed to a local or transport failure.
    pub fn is_handshake_rejection(&self) -> bool {
        matches!(
            self,
            ProtocolError::ProtocolMismatch(_) | ProtocolError::MissingKey
        )
    }

    /// Returns whether the peer closed the stream, either cleanly between
    /// frames or in the middle of one.
    pub fn is_closed(&self) -> bool {
        match self {
            ProtocolError::TruncatedFrame(_) => true,
            ProtocolError::Transport(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}
