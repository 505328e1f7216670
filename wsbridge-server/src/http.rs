//! Minimal HTTP/1.1 front end: reads one request head and lends the
//! connection out for hijacking.
//!
//! Bodies, keep-alive and routing are not handled. A connection serves one
//! upgrade request and is then either hijacked or answered with an error
//! and closed.

use crate::error::ServerError;
use std::io;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use wsbridge_protocol::{HeaderLookup, Hijack};

/// Default cap on the size of a request head (request line + headers).
pub const DEFAULT_MAX_HEADER_BYTES: usize = 8 * 1024;

/// A parsed request line and header block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub target: String,
    pub version: String,
    headers: Vec<(String, String)>,
}

impl RequestHead {
    /// Parses a head from its lines, the request line first.
    ///
    /// Repeated header names are folded into one value joined by `", "`.
    pub fn parse<'a, I>(lines: I) -> Result<Self, ServerError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut lines = lines.into_iter();
        let request_line = lines
            .next()
            .ok_or_else(|| ServerError::MalformedRequest("empty request".into()))?;

        let mut parts = request_line.split(' ');
        let fields = (parts.next(), parts.next(), parts.next(), parts.next());
        let (method, target, version) = match fields {
            (Some(m), Some(t), Some(v), None) if !m.is_empty() && !t.is_empty() => (m, t, v),
            _ => {
                return Err(ServerError::MalformedRequest(format!(
                    "invalid request line: {:?}",
                    request_line
                )))
            }
        };
        if !version.starts_with("HTTP/1.") {
            return Err(ServerError::MalformedRequest(format!(
                "unsupported HTTP version: {}",
                version
            )));
        }

        let mut headers: Vec<(String, String)> = Vec::new();
        for line in lines {
            let (name, value) = line.split_once(':').ok_or_else(|| {
                ServerError::MalformedRequest(format!("invalid header line: {:?}", line))
            })?;
            let name = name.trim();
            if name.is_empty() || name.contains(char::is_whitespace) {
                return Err(ServerError::MalformedRequest(format!(
                    "invalid header name: {:?}",
                    name
                )));
            }
            let value = value.trim();

            match headers
                .iter_mut()
                .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            {
                Some((_, existing)) => {
                    existing.push_str(", ");
                    existing.push_str(value);
                }
                None => headers.push((name.to_string(), value.to_string())),
            }
        }

        Ok(Self {
            method: method.to_string(),
            target: target.to_string(),
            version: version.to_string(),
            headers,
        })
    }

    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl HeaderLookup for RequestHead {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// An accepted connection that has not been upgraded yet.
///
/// Reads go through a buffer so bytes the client sends right after the
/// request head stay available to whoever hijacks the connection.
#[derive(Debug)]
pub struct HttpConnection<S> {
    stream: BufReader<S>,
    max_header_bytes: usize,
    hijacked: bool,
}

impl<S> HttpConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, max_header_bytes: usize) -> Self {
        Self {
            stream: BufReader::new(stream),
            max_header_bytes,
            hijacked: false,
        }
    }

    pub fn is_hijacked(&self) -> bool {
        self.hijacked
    }

    /// Reads and parses the request head, consuming the blank line that
    /// ends it.
    pub async fn read_head(&mut self) -> Result<RequestHead, ServerError> {
        let mut raw = Vec::new();
        let mut lines: Vec<String> = Vec::new();

        loop {
            let remaining = self.max_header_bytes.saturating_sub(raw.len());
            if remaining == 0 {
                return Err(ServerError::HeaderTooLarge {
                    max: self.max_header_bytes,
                });
            }

            let start = raw.len();
            let n = (&mut self.stream)
                .take(remaining as u64)
                .read_until(b'\n', &mut raw)
                .await?;
            if n == 0 {
                return Err(ServerError::MalformedRequest(
                    "connection closed before end of request head".into(),
                ));
            }
            if raw.last() != Some(&b'\n') {
                if n == remaining {
                    return Err(ServerError::HeaderTooLarge {
                        max: self.max_header_bytes,
                    });
                }
                return Err(ServerError::MalformedRequest(
                    "connection closed before end of request head".into(),
                ));
            }

            let line = std::str::from_utf8(&raw[start..])
                .map_err(|_| ServerError::MalformedRequest("request head is not UTF-8".into()))?
                .trim_end_matches(&['\r', '\n'][..]);

            if line.is_empty() {
                // Tolerate blank lines ahead of the request line
                if lines.is_empty() {
                    continue;
                }
                break;
            }
            lines.push(line.to_string());
        }

        let head = RequestHead::parse(lines.iter().map(String::as_str))?;
        tracing::debug!(
            method = %head.method,
            target = %head.target,
            headers = head.headers.len(),
            "read request head"
        );
        Ok(head)
    }

    /// Writes a plain-text error response. The connection should be closed
    /// afterwards.
    pub async fn respond_error(
        &mut self,
        status: u16,
        reason: &str,
        body: &str,
    ) -> Result<(), ServerError> {
        if self.hijacked {
            return Err(ServerError::Io(already_hijacked()));
        }
        let response = format!(
            "HTTP/1.1 {status} {reason}\r\n\
             Content-Type: text/plain; charset=utf-8\r\n\
             Content-Length: {}\r\n\
             Connection: close\r\n\r\n\
             {body}",
            body.len()
        );
        let stream = self.stream.get_mut();
        stream.write_all(response.as_bytes()).await?;
        stream.flush().await?;
        Ok(())
    }
}

fn already_hijacked() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "connection already hijacked")
}

impl<'a, S> Hijack for &'a mut HttpConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    type Stream = &'a mut BufReader<S>;

    fn hijack(self) -> io::Result<Self::Stream> {
        if self.hijacked {
            return Err(already_hijacked());
        }
        self.hijacked = true;
        Ok(&mut self.stream)
    }
}
