//! An upgraded connection paired with the codec that reads and writes it.

use crate::codec::FrameCodec;
use crate::error::ProtocolError;
use crate::frame::Frame;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};

/// WebSocket connection after a successful handshake.
///
/// Owns the stream exclusively; reads and writes are sequential.
#[derive(Debug)]
pub struct WebSocket<S> {
    stream: S,
    codec: FrameCodec,
}

impl<S> WebSocket<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self::with_codec(stream, FrameCodec::default())
    }

    pub fn with_codec(stream: S, codec: FrameCodec) -> Self {
        Self { stream, codec }
    }

    /// Receives the next complete message.
    pub async fn recv(&mut self) -> Result<Bytes, ProtocolError> {
        self.codec.read_message(&mut self.stream).await
    }

    /// Receives the next single frame.
    pub async fn recv_frame(&mut self) -> Result<Frame, ProtocolError> {
        self.codec.read_frame(&mut self.stream).await
    }

    /// Sends `payload` as one text frame.
    pub async fn send(&mut self, payload: &[u8]) -> Result<(), ProtocolError> {
        self.codec.write_message(&mut self.stream, payload).await
    }

    pub fn codec(&self) -> &FrameCodec {
        &self.codec
    }
}
