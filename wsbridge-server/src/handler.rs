//! Application message handlers.

use crate::session::Session;
use bytes::Bytes;

/// Handles messages received on an upgraded connection.
///
/// Called once per assembled message, in arrival order. Returning
/// `Some(reply)` sends the reply back as a single text frame.
pub trait MessageHandler: Send + Sync + 'static {
    fn handle(&self, session: &Session, message: Bytes) -> Option<Bytes>;

    /// Called once after the upgrade succeeds.
    fn on_open(&self, _session: &Session) {}

    /// Called once when the connection ends, whatever the reason.
    fn on_close(&self, _session: &Session) {}
}

/// Writes every message back to its sender.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoHandler;

impl MessageHandler for EchoHandler {
    fn handle(&self, session: &Session, message: Bytes) -> Option<Bytes> {
        tracing::info!(
            "[{}] {}",
            session.remote_addr,
            String::from_utf8_lossy(&message)
        );
        Some(message)
    }

    fn on_open(&self, session: &Session) {
        tracing::info!(
            "[{}] WebSocket opened on {}",
            session.remote_addr,
            session.path().unwrap_or("/")
        );
    }
}
