//! Server side of the WebSocket opening handshake (RFC 6455 §4.2).
//!
//! ```http
//! GET /chat HTTP/1.1
//! Upgrade: websocket
//! Connection: Upgrade
//! Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==
//! ```
//!
//! is answered with
//!
//! ```http
//! HTTP/1.1 101 Switching Protocols
//! Upgrade: websocket
//! Connection: Upgrade
//! Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=
//! ```

use crate::error::ProtocolError;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// GUID appended to the client key before hashing (RFC 6455 §1.3).
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Computes the `Sec-WebSocket-Accept` value for a client key.
///
/// ```
/// use wsbridge_protocol::handshake::accept_key;
///
/// assert_eq!(
///     accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
///     "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
/// );
/// ```
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Returns whether `token` appears among the whitespace-separated words of
/// `value`. The comparison is exact and case-sensitive.
pub fn has_token(value: &str, token: &str) -> bool {
    value.split_whitespace().any(|t| t == token)
}

/// The `101 Switching Protocols` response for an accept key.
pub fn switching_protocols_response(accept: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\r\n"
    )
    .into_bytes()
}

/// Read access to request headers by name.
///
/// Implementations must match names case-insensitively.
pub trait HeaderLookup {
    fn header(&self, name: &str) -> Option<&str>;
}

impl HeaderLookup for HashMap<String, String> {
    fn header(&self, name: &str) -> Option<&str> {
        self.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

impl<'a> HeaderLookup for [(&'a str, &'a str)] {
    fn header(&self, name: &str) -> Option<&str> {
        self.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| *v)
    }
}

/// Capability to take exclusive raw control of the transport underneath an
/// HTTP request.
pub trait Hijack {
    type Stream: AsyncRead + AsyncWrite + Unpin;

    fn hijack(self) -> io::Result<Self::Stream>;
}

/// The headers of an upgrade request that the handshake looks at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpgradeRequest<'a> {
    pub upgrade: Option<&'a str>,
    pub connection: Option<&'a str>,
    pub key: Option<&'a str>,
}

impl<'a> UpgradeRequest<'a> {
    pub fn from_headers<H>(headers: &'a H) -> Self
    where
        H: HeaderLookup + ?Sized,
    {
        Self {
            upgrade: headers.header("Upgrade"),
            connection: headers.header("Connection"),
            key: headers.header("Sec-WebSocket-Key"),
        }
    }

    /// Checks the upgrade headers in order and returns the client key.
    pub fn validate(&self) -> Result<&'a str, ProtocolError> {
        if !self.upgrade.is_some_and(|v| has_token(v, "websocket")) {
            return Err(ProtocolError::ProtocolMismatch(
                "unidentified upgrade protocol",
            ));
        }
        if !self.connection.is_some_and(|v| has_token(v, "Upgrade")) {
            return Err(ProtocolError::ProtocolMismatch(
                "Connection: Upgrade header expected",
            ));
        }
        match self.key {
            Some(key) if !key.is_empty() => Ok(key),
            _ => Err(ProtocolError::MissingKey),
        }
    }
}

/// Validates an upgrade request, hijacks the connection and writes the
/// `101` response.
///
/// Nothing is hijacked or written when validation fails. A `None` hijacker
/// means the transport does not support raw takeover. After a write or
/// flush failure the returned stream is gone and the connection must be
/// treated as unusable.
pub async fn upgrade<H, J>(headers: &H, hijacker: Option<J>) -> Result<J::Stream, ProtocolError>
where
    H: HeaderLookup + ?Sized,
    J: Hijack,
{
    let key = UpgradeRequest::from_headers(headers).validate()?;
    let accept = accept_key(key);

    let hijacker = hijacker.ok_or(ProtocolError::HijackUnavailable)?;
    let mut stream = hijacker.hijack()?;

    stream
        .write_all(&switching_protocols_response(&accept))
        .await?;
    stream.flush().await?;

    tracing::debug!(accept = %accept, "switched protocols");
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::io::{duplex, AsyncReadExt, DuplexStream};

    const SAMPLE_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

    /// Hands out one end of an in-memory pipe and records that it did.
    struct PipeHijacker {
        stream: DuplexStream,
        hijacked: Arc<AtomicBool>,
    }

    impl Hijack for PipeHijacker {
        type Stream = DuplexStream;

        fn hijack(self) -> io::Result<DuplexStream> {
            self.hijacked.store(true, Ordering::SeqCst);
            Ok(self.stream)
        }
    }

    struct FailingHijacker;

    impl Hijack for FailingHijacker {
        type Stream = DuplexStream;

        fn hijack(self) -> io::Result<DuplexStream> {
            Err(io::Error::new(io::ErrorKind::NotConnected, "already hijacked"))
        }
    }

    fn pipe() -> (PipeHijacker, DuplexStream, Arc<AtomicBool>) {
        let (server, client) = duplex(1024);
        let hijacked = Arc::new(AtomicBool::new(false));
        let hijacker = PipeHijacker {
            stream: server,
            hijacked: hijacked.clone(),
        };
        (hijacker, client, hijacked)
    }

    fn valid_headers() -> Vec<(&'static str, &'static str)> {
        vec![
            ("Host", "example.com"),
            ("Upgrade", "websocket"),
            ("Connection", "Upgrade"),
            ("Sec-WebSocket-Key", SAMPLE_KEY),
        ]
    }

    #[test]
    fn test_accept_key_rfc_example() {
        assert_eq!(accept_key(SAMPLE_KEY), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn test_has_token() {
        assert!(has_token("websocket", "websocket"));
        assert!(has_token("  keep-alive   Upgrade ", "Upgrade"));
        assert!(has_token("h2c\twebsocket", "websocket"));
        assert!(!has_token("WebSocket", "websocket"));
        assert!(!has_token("websockets", "websocket"));
        // Only whitespace separates tokens; a trailing comma stays attached
        // to the preceding word
        assert!(has_token("keep-alive, Upgrade", "Upgrade"));
        assert!(!has_token("keep-alive,Upgrade", "Upgrade"));
        assert!(!has_token("Upgrade, keep-alive", "Upgrade"));
        assert!(!has_token("", "Upgrade"));
    }

    #[test]
    fn test_response_bytes() {
        let response = switching_protocols_response("s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
        assert_eq!(
            response,
            b"HTTP/1.1 101 Switching Protocols\r\n\
              Upgrade: websocket\r\n\
              Connection: Upgrade\r\n\
              Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\r\n"
                .to_vec()
        );
    }

    #[test]
    fn test_header_lookup_case_insensitive() {
        let mut map = HashMap::new();
        map.insert("sec-websocket-key".to_string(), SAMPLE_KEY.to_string());
        assert_eq!(map.header("Sec-WebSocket-Key"), Some(SAMPLE_KEY));

        let pairs: &[(&str, &str)] = &[("UPGRADE", "websocket")];
        assert_eq!(pairs.header("upgrade"), Some("websocket"));
        assert_eq!(pairs.header("Connection"), None);
    }

    #[test]
    fn test_validation_order() {
        let request = UpgradeRequest::default();
        assert!(matches!(
            request.validate(),
            Err(ProtocolError::ProtocolMismatch(_))
        ));

        let request = UpgradeRequest {
            upgrade: Some("websocket"),
            ..Default::default()
        };
        assert!(matches!(
            request.validate(),
            Err(ProtocolError::ProtocolMismatch(msg)) if msg.contains("Connection")
        ));

        let request = UpgradeRequest {
            upgrade: Some("websocket"),
            connection: Some("Upgrade"),
            key: Some(""),
        };
        assert!(matches!(request.validate(), Err(ProtocolError::MissingKey)));

        let request = UpgradeRequest {
            upgrade: Some("websocket"),
            connection: Some("Upgrade"),
            key: Some(SAMPLE_KEY),
        };
        assert_eq!(request.validate().unwrap(), SAMPLE_KEY);
    }

    #[test]
    fn test_validate_accepts_connection_list() {
        // The value browsers such as Firefox send
        let request = UpgradeRequest {
            upgrade: Some("websocket"),
            connection: Some("keep-alive, Upgrade"),
            key: Some(SAMPLE_KEY),
        };
        assert_eq!(request.validate().unwrap(), SAMPLE_KEY);

        let request = UpgradeRequest {
            connection: Some("keep-alive,Upgrade"),
            ..request
        };
        assert!(matches!(
            request.validate(),
            Err(ProtocolError::ProtocolMismatch(_))
        ));
    }

    #[tokio::test]
    async fn test_upgrade_writes_response() {
        let (hijacker, mut client, hijacked) = pipe();
        let headers = valid_headers();

        let stream = upgrade(headers.as_slice(), Some(hijacker)).await.unwrap();
        assert!(hijacked.load(Ordering::SeqCst));
        drop(stream);

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        assert_eq!(response, switching_protocols_response("s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));
    }

    #[tokio::test]
    async fn test_missing_key_no_hijack_no_write() {
        let (hijacker, mut client, hijacked) = pipe();
        let headers = [("Upgrade", "websocket"), ("Connection", "Upgrade")];

        let result = upgrade(&headers[..], Some(hijacker)).await;
        assert!(matches!(result, Err(ProtocolError::MissingKey)));
        assert!(!hijacked.load(Ordering::SeqCst));

        // The hijacker (and its pipe end) was dropped unused
        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        assert!(response.is_empty());
    }

    #[tokio::test]
    async fn test_upgrade_header_mismatch() {
        let (hijacker, _client, hijacked) = pipe();
        let headers = [
            ("Upgrade", "h2c"),
            ("Connection", "Upgrade"),
            ("Sec-WebSocket-Key", SAMPLE_KEY),
        ];

        let result = upgrade(&headers[..], Some(hijacker)).await;
        assert!(matches!(result, Err(ProtocolError::ProtocolMismatch(_))));
        assert!(!hijacked.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_hijack_unavailable() {
        let headers = valid_headers();
        let result = upgrade(headers.as_slice(), None::<PipeHijacker>).await;
        assert!(matches!(result, Err(ProtocolError::HijackUnavailable)));
    }

    #[tokio::test]
    async fn test_hijack_failure_is_transport_error() {
        let headers = valid_headers();
        let result = upgrade(headers.as_slice(), Some(FailingHijacker)).await;
        assert!(matches!(result, Err(ProtocolError::Transport(_))));
    }

    #[tokio::test]
    async fn test_response_write_failure() {
        let (hijacker, client, _hijacked) = pipe();
        drop(client);
        let headers = valid_headers();

        let result = upgrade(headers.as_slice(), Some(hijacker)).await;
        assert!(matches!(result, Err(ProtocolError::Transport(_))));
    }
}
