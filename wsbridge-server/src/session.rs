//! Per-connection session state.

use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the HTTP upgrade request.
    Handshaking,
    /// Upgraded; exchanging frames.
    Open,
    /// Connection is being torn down.
    Closing,
}

/// A client connection, from accept to close.
pub struct Session {
    /// Unique session ID, used to correlate log lines.
    pub id: String,

    /// Remote address.
    pub remote_addr: SocketAddr,

    state: SessionState,

    /// Request target of the upgrade request.
    path: Option<String>,

    messages_received: AtomicU64,
    messages_sent: AtomicU64,
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,

    created_at: Instant,
    last_activity: Mutex<Instant>,
}

impl Session {
    pub fn new(remote_addr: SocketAddr) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            remote_addr,
            state: SessionState::Handshaking,
            path: None,
            messages_received: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            created_at: Instant::now(),
            last_activity: Mutex::new(Instant::now()),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn set_state(&mut self, state: SessionState) {
        self.state = state;
    }

    /// Marks the session upgraded for the given request target.
    pub fn open(&mut self, path: impl Into<String>) {
        self.path = Some(path.into());
        self.state = SessionState::Open;
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Records an inbound message.
    pub fn record_received(&self, len: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(len as u64, Ordering::Relaxed);
        *self.last_activity.lock() = Instant::now();
    }

    /// Records an outbound message.
    pub fn record_sent(&self, len: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(len as u64, Ordering::Relaxed);
        *self.last_activity.lock() = Instant::now();
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Returns the time since last activity.
    pub fn idle_duration(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Returns the session age.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn test_addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 12345)
    }

    #[test]
    fn test_session_creation() {
        let session = Session::new(test_addr());
        assert_eq!(session.state(), SessionState::Handshaking);
        assert_eq!(session.path(), None);
        assert_eq!(session.messages_received(), 0);
    }

    #[test]
    fn test_session_open() {
        let mut session = Session::new(test_addr());
        session.open("/chat");
        assert_eq!(session.state(), SessionState::Open);
        assert_eq!(session.path(), Some("/chat"));

        session.set_state(SessionState::Closing);
        assert_eq!(session.state(), SessionState::Closing);
    }

    #[test]
    fn test_session_counters() {
        let session = Session::new(test_addr());
        session.record_received(5);
        session.record_received(7);
        session.record_sent(12);

        assert_eq!(session.messages_received(), 2);
        assert_eq!(session.bytes_received(), 12);
        assert_eq!(session.messages_sent(), 1);
        assert_eq!(session.bytes_sent(), 12);
        assert!(session.idle_duration() <= session.age());
    }

    #[test]
    fn test_session_ids_unique() {
        let a = Session::new(test_addr());
        let b = Session::new(test_addr());
        assert_ne!(a.id, b.id);
    }
}
