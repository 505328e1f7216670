//! Server error types.

use std::time::Duration;
use thiserror::Error;
use wsbridge_protocol::ProtocolError;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("request head exceeds {max} bytes")]
    HeaderTooLarge { max: usize },

    #[error("no request head within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("server shutting down")]
    ShuttingDown,
}

impl ServerError {
    /// Returns the HTTP status to answer with when this error happens before
    /// the connection is upgraded, or `None` if nothing should be written.
    pub fn http_status(&self) -> Option<(u16, &'static str)> {
        match self {
            ServerError::MalformedRequest(_) => Some((400, "Bad Request")),
            ServerError::HeaderTooLarge { .. } => {
                Some((431, "Request Header Fields Too Large"))
            }
            ServerError::Protocol(e) if e.is_handshake_rejection() => Some((400, "Bad Request")),
            ServerError::Protocol(ProtocolError::HijackUnavailable) => {
                Some((500, "Internal Server Error"))
            }
            _ => None,
        }
    }

    /// Returns whether the client caused the error.
    pub fn is_client_fault(&self) -> bool {
        match self {
            ServerError::MalformedRequest(_)
            | ServerError::HeaderTooLarge { .. }
            | ServerError::HandshakeTimeout(_) => true,
            ServerError::Protocol(e) => matches!(
                e,
                ProtocolError::ProtocolMismatch(_)
                    | ProtocolError::MissingKey
                    | ProtocolError::TruncatedFrame(_)
                    | ProtocolError::FrameTooLarge { .. }
                    | ProtocolError::MessageTooLarge { .. }
                    | ProtocolError::UnmaskedFrame
            ),
            ServerError::Io(_) | ServerError::ShuttingDown => false,
        }
    }
}
