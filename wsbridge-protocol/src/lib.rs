//! # wsbridge-protocol
//!
//! Server side of the WebSocket wire protocol (RFC 6455 base framing).
//!
//! This crate provides:
//! - The opening handshake: header validation, accept key, connection hijack
//! - Frame layout with 7/16/64-bit length tiers and payload masking
//! - A stream codec reading frames and fragmented messages, writing text messages
//! - Error types shared by all of the above
//!
//! Compression, subprotocols, ping/pong handling and the closing handshake
//! are not implemented; control frames are delivered like data frames.

pub mod codec;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod socket;

pub use codec::{read_frame, read_message, write_message, FrameCodec};
pub use error::ProtocolError;
pub use frame::{apply_mask, Frame, FrameHeader, LengthTier, Opcode, MAX_HEADER_SIZE};
pub use handshake::{accept_key, upgrade, HeaderLookup, Hijack, UpgradeRequest, WEBSOCKET_GUID};
pub use socket::WebSocket;

/// Default limit on a single frame's payload (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: u64 = 16 * 1024 * 1024;

/// Default limit on an assembled message (64 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: u64 = 64 * 1024 * 1024;
