//! WebSocket base frame format (RFC 6455 §5.2), without extensions.
//!
//! ```text
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Extended payload length continued, if payload len == 127  |
//! + - - - - - - - - - - - - - - - +-------------------------------+
//! |                               | Masking-key, if MASK set to 1 |
//! +-------------------------------+-------------------------------+
//! | Masking-key (continued)       |          Payload Data         |
//! +-------------------------------- - - - - - - - - - - - - - - - +
//! ```
//!
//! Reserved bits are neither set on encode nor validated on decode.

use crate::error::ProtocolError;
use crate::DEFAULT_MAX_FRAME_SIZE;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Largest possible header: 2 fixed bytes + 8 length bytes + 4 mask bytes.
pub const MAX_HEADER_SIZE: usize = 14;

const FIN_BIT: u8 = 0x80;
const MASK_BIT: u8 = 0x80;
const OPCODE_MASK: u8 = 0x0F;
const LENGTH_MASK: u8 = 0x7F;

/// Length code announcing a 16-bit extended length.
const LENGTH_CODE_16: u8 = 126;
/// Length code announcing a 64-bit extended length.
const LENGTH_CODE_64: u8 = 127;

/// Frame opcode (low nibble of the first header byte).
///
/// Values without a defined meaning are kept as `Reserved` and travel
/// through the codec like any data frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
    Reserved(u8),
}

impl Opcode {
    /// Decodes the low 4 bits of `bits`.
    pub fn from_bits(bits: u8) -> Self {
        match bits & OPCODE_MASK {
            0x0 => Opcode::Continuation,
            0x1 => Opcode::Text,
            0x2 => Opcode::Binary,
            0x8 => Opcode::Close,
            0x9 => Opcode::Ping,
            0xA => Opcode::Pong,
            other => Opcode::Reserved(other),
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
            Opcode::Reserved(bits) => bits & OPCODE_MASK,
        }
    }

    /// Control opcodes have the high bit of the nibble set.
    pub fn is_control(self) -> bool {
        self.bits() & 0x08 != 0
    }
}

/// Which encoding the payload length field uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthTier {
    /// Length carried in the 7-bit code itself (0..=125).
    Direct,
    /// Code 126 followed by a big-endian u16 (126..=65535).
    Extended16,
    /// Code 127 followed by a big-endian u64.
    Extended64,
}

impl LengthTier {
    /// Picks the smallest tier able to carry `len`.
    pub fn for_len(len: u64) -> Self {
        if len <= 125 {
            LengthTier::Direct
        } else if len <= u16::MAX as u64 {
            LengthTier::Extended16
        } else {
            LengthTier::Extended64
        }
    }

    /// Number of extended length bytes following the second header byte.
    pub fn field_size(self) -> usize {
        match self {
            LengthTier::Direct => 0,
            LengthTier::Extended16 => 2,
            LengthTier::Extended64 => 8,
        }
    }

    fn from_code(code: u8) -> Self {
        match code {
            LENGTH_CODE_16 => LengthTier::Extended16,
            LENGTH_CODE_64 => LengthTier::Extended64,
            _ => LengthTier::Direct,
        }
    }
}

/// The two fixed header bytes, before the extended length and mask key
/// have been read.
#[derive(Debug, Clone, Copy)]
pub(crate) struct HeaderPrefix {
    fin: bool,
    opcode: Opcode,
    masked: bool,
    length_code: u8,
}

impl HeaderPrefix {
    pub(crate) fn parse(b0: u8, b1: u8) -> Self {
        Self {
            fin: b0 & FIN_BIT != 0,
            opcode: Opcode::from_bits(b0),
            masked: b1 & MASK_BIT != 0,
            length_code: b1 & LENGTH_MASK,
        }
    }

    /// Bytes still needed to complete the header.
    pub(crate) fn remaining_len(&self) -> usize {
        let mask = if self.masked { 4 } else { 0 };
        LengthTier::from_code(self.length_code).field_size() + mask
    }

    /// Completes the header from the `remaining_len()` bytes that follow
    /// the prefix.
    pub(crate) fn complete(self, rest: &[u8]) -> FrameHeader {
        debug_assert_eq!(rest.len(), self.remaining_len());
        let mut rest = rest;
        let payload_len = match LengthTier::from_code(self.length_code) {
            LengthTier::Direct => self.length_code as u64,
            LengthTier::Extended16 => rest.get_u16() as u64,
            LengthTier::Extended64 => rest.get_u64(),
        };
        let mask = if self.masked {
            let mut key = [0u8; 4];
            rest.copy_to_slice(&mut key);
            Some(key)
        } else {
            None
        };
        FrameHeader {
            fin: self.fin,
            opcode: self.opcode,
            mask,
            payload_len,
        }
    }
}

/// A fully decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub fin: bool,
    pub opcode: Opcode,
    pub mask: Option<[u8; 4]>,
    pub payload_len: u64,
}

impl FrameHeader {
    pub fn is_masked(&self) -> bool {
        self.mask.is_some()
    }

    /// Encoded size of this header in bytes.
    pub fn encoded_len(&self) -> usize {
        let mask = if self.mask.is_some() { 4 } else { 0 };
        2 + LengthTier::for_len(self.payload_len).field_size() + mask
    }

    /// Writes the header using the minimal length tier.
    pub fn encode_into(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());

        let mut b0 = self.opcode.bits();
        if self.fin {
            b0 |= FIN_BIT;
        }
        dst.put_u8(b0);

        let mask_bit = if self.mask.is_some() { MASK_BIT } else { 0 };
        match LengthTier::for_len(self.payload_len) {
            LengthTier::Direct => dst.put_u8(mask_bit | self.payload_len as u8),
            LengthTier::Extended16 => {
                dst.put_u8(mask_bit | LENGTH_CODE_16);
                dst.put_u16(self.payload_len as u16);
            }
            LengthTier::Extended64 => {
                dst.put_u8(mask_bit | LENGTH_CODE_64);
                dst.put_u64(self.payload_len);
            }
        }

        if let Some(key) = self.mask {
            dst.put_slice(&key);
        }
    }
}

/// A single WebSocket frame. `payload` always holds unmasked bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    /// Key applied to the payload on the wire, if any.
    pub mask: Option<[u8; 4]>,
    pub payload: Bytes,
}

impl Frame {
    /// Creates a final, unmasked frame.
    pub fn new(opcode: Opcode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin: true,
            opcode,
            mask: None,
            payload: payload.into(),
        }
    }

    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Text, payload)
    }

    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Binary, payload)
    }

    pub fn continuation(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Continuation, payload)
    }

    pub fn with_fin(mut self, fin: bool) -> Self {
        self.fin = fin;
        self
    }

    pub fn with_mask(mut self, key: [u8; 4]) -> Self {
        self.mask = Some(key);
        self
    }

    pub fn header(&self) -> FrameHeader {
        FrameHeader {
            fin: self.fin,
            opcode: self.opcode,
            mask: self.mask,
            payload_len: self.payload.len() as u64,
        }
    }

    /// Total encoded size (header + payload).
    pub fn encoded_len(&self) -> usize {
        self.header().encoded_len() + self.payload.len()
    }

    /// Encodes the frame into a fresh buffer.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf
    }

    /// Appends the encoded frame to `dst`, masking the payload if a key is set.
    pub fn encode_into(&self, dst: &mut BytesMut) {
        self.header().encode_into(dst);
        let start = dst.len();
        dst.put_slice(&self.payload);
        if let Some(key) = self.mask {
            apply_mask(&mut dst[start..], key);
        }
    }

    /// Decodes a frame from bytes, using the default frame size limit.
    ///
    /// Returns `Ok(Some(frame))` if a complete frame was decoded,
    /// `Ok(None)` if more data is needed, or `Err` on protocol errors.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        Self::decode_with_limit(buf, DEFAULT_MAX_FRAME_SIZE)
    }

    /// Like [`Frame::decode`], rejecting declared payloads above `max_size`.
    pub fn decode_with_limit(
        buf: &mut BytesMut,
        max_size: u64,
    ) -> Result<Option<Self>, ProtocolError> {
        if buf.len() < 2 {
            return Ok(None);
        }

        // Peek at the header without consuming
        let prefix = HeaderPrefix::parse(buf[0], buf[1]);
        let header_len = 2 + prefix.remaining_len();
        if buf.len() < header_len {
            return Ok(None);
        }
        let header = prefix.complete(&buf[2..header_len]);

        let payload_len = checked_payload_len(header.payload_len, max_size)?;
        if buf.len() < header_len + payload_len {
            return Ok(None);
        }

        buf.advance(header_len);
        let mut payload = buf.split_to(payload_len);
        if let Some(key) = header.mask {
            apply_mask(&mut payload, key);
        }

        Ok(Some(Self {
            fin: header.fin,
            opcode: header.opcode,
            mask: header.mask,
            payload: payload.freeze(),
        }))
    }
}

/// Validates a declared payload length against `max_size` and the address
/// space, returning it as a `usize`.
pub(crate) fn checked_payload_len(len: u64, max_size: u64) -> Result<usize, ProtocolError> {
    if len > max_size {
        return Err(ProtocolError::FrameTooLarge {
            size: len,
            max: max_size,
        });
    }
    usize::try_from(len).map_err(|_| ProtocolError::FrameTooLarge {
        size: len,
        max: usize::MAX as u64,
    })
}

/// XORs `payload` in place with `key[i % 4]`.
///
/// Applying the same key twice restores the original bytes, so this both
/// masks and unmasks.
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}
