//! # wsbridge-server
//!
//! TCP front end for wsbridge.
//!
//! This crate provides:
//! - TCP connection handling with async I/O
//! - A minimal HTTP/1.1 request-head reader with connection hijacking
//! - WebSocket upgrade and a per-connection message loop
//! - Session tracking and server statistics
//! - YAML/environment configuration

pub mod config;
pub mod error;
pub mod handler;
pub mod http;
pub mod server;
pub mod session;

pub use config::{Config, ConfigError, NetworkConfig, WebSocketConfig};
pub use error::ServerError;
pub use handler::{EchoHandler, MessageHandler};
pub use http::{HttpConnection, RequestHead};
pub use server::{Server, ServerConfig, ServerStats};
pub use session::{Session, SessionState};
