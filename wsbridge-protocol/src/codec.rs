//! Stream codec: reads frames and messages from, and writes messages to,
//! an async byte stream.
//!
//! Each call reads or writes whole frames. Nothing is buffered between
//! calls, so a frame either arrives completely or the call fails and the
//! connection should be dropped.

use crate::error::ProtocolError;
use crate::frame::{apply_mask, checked_payload_len, Frame, FrameHeader, HeaderPrefix, Opcode};
use crate::{DEFAULT_MAX_FRAME_SIZE, DEFAULT_MAX_MESSAGE_SIZE, MAX_HEADER_SIZE};
use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Limits and checks applied by the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    max_frame_size: u64,
    max_message_size: u64,
    require_masked: bool,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            require_masked: false,
        }
    }
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the largest payload a single inbound frame may declare.
    pub fn with_max_frame_size(mut self, size: u64) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Sets the largest assembled message `read_message` will return.
    pub fn with_max_message_size(mut self, size: u64) -> Self {
        self.max_message_size = size;
        self
    }

    /// Rejects inbound frames that carry no masking key.
    pub fn with_require_masked(mut self, require: bool) -> Self {
        self.require_masked = require;
        self
    }

    pub fn max_frame_size(&self) -> u64 {
        self.max_frame_size
    }

    pub fn max_message_size(&self) -> u64 {
        self.max_message_size
    }

    pub fn require_masked(&self) -> bool {
        self.require_masked
    }

    /// Reads exactly one frame, unmasking its payload.
    pub async fn read_frame<R>(&self, reader: &mut R) -> Result<Frame, ProtocolError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut head = [0u8; MAX_HEADER_SIZE];
        reader
            .read_exact(&mut head[..2])
            .await
            .map_err(|e| ProtocolError::from_read(e, "frame header"))?;

        let prefix = HeaderPrefix::parse(head[0], head[1]);
        let header_len = 2 + prefix.remaining_len();
        if header_len > 2 {
            reader
                .read_exact(&mut head[2..header_len])
                .await
                .map_err(|e| ProtocolError::from_read(e, "extended header"))?;
        }
        let header = prefix.complete(&head[2..header_len]);

        if self.require_masked && !header.is_masked() {
            return Err(ProtocolError::UnmaskedFrame);
        }
        let payload_len = checked_payload_len(header.payload_len, self.max_frame_size)?;

        let mut payload = BytesMut::zeroed(payload_len);
        reader
            .read_exact(&mut payload)
            .await
            .map_err(|e| ProtocolError::from_read(e, "payload"))?;
        if let Some(key) = header.mask {
            apply_mask(&mut payload, key);
        }

        tracing::trace!(
            fin = header.fin,
            opcode = ?header.opcode,
            masked = header.is_masked(),
            len = payload_len,
            "read frame"
        );

        Ok(Frame {
            fin: header.fin,
            opcode: header.opcode,
            mask: header.mask,
            payload: payload.freeze(),
        })
    }

    /// Reads frames until one has the final flag set and returns the
    /// concatenated payloads.
    ///
    /// Opcodes are not interpreted; any error discards what was assembled.
    pub async fn read_message<R>(&self, reader: &mut R) -> Result<Bytes, ProtocolError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let first = self.read_frame(reader).await?;
        self.check_message_size(first.payload.len() as u64)?;
        if first.fin {
            return Ok(first.payload);
        }

        let mut message = BytesMut::from(first.payload.as_ref());
        let mut frames = 1usize;
        loop {
            let frame = self.read_frame(reader).await?;
            frames += 1;
            self.check_message_size(message.len() as u64 + frame.payload.len() as u64)?;
            message.extend_from_slice(&frame.payload);
            if frame.fin {
                tracing::trace!(frames, len = message.len(), "assembled message");
                return Ok(message.freeze());
            }
        }
    }

    /// Writes `payload` as a single final, unmasked text frame and flushes.
    pub async fn write_message<W>(
        &self,
        writer: &mut W,
        payload: &[u8],
    ) -> Result<(), ProtocolError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let header = FrameHeader {
            fin: true,
            opcode: Opcode::Text,
            mask: None,
            payload_len: payload.len() as u64,
        };
        let mut buf = BytesMut::with_capacity(header.encoded_len() + payload.len());
        header.encode_into(&mut buf);
        buf.put_slice(payload);
        write_all_and_flush(writer, &buf).await
    }

    /// Writes an arbitrary frame and flushes.
    pub async fn write_frame<W>(&self, writer: &mut W, frame: &Frame) -> Result<(), ProtocolError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let buf = frame.encode();
        write_all_and_flush(writer, &buf).await
    }

    fn check_message_size(&self, size: u64) -> Result<(), ProtocolError> {
        if size > self.max_message_size {
            return Err(ProtocolError::MessageTooLarge {
                size,
                max: self.max_message_size,
            });
        }
        Ok(())
    }
}

async fn write_all_and_flush<W>(writer: &mut W, buf: &[u8]) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(buf).await?;
    writer.flush().await?;
    tracing::trace!(len = buf.len(), "wrote frame");
    Ok(())
}

/// Reads one frame with the default codec.
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame, ProtocolError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    FrameCodec::default().read_frame(reader).await
}

/// Reads one message with the default codec.
pub async fn read_message<R>(reader: &mut R) -> Result<Bytes, ProtocolError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    FrameCodec::default().read_message(reader).await
}

/// Writes one text message with the default codec.
pub async fn write_message<W>(writer: &mut W, payload: &[u8]) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    FrameCodec::default().write_message(writer, payload).await
}
