//! Server configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via WSBRIDGE_CONFIG or --config)
//! 3. Environment variables

use crate::http::DEFAULT_MAX_HEADER_BYTES;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use wsbridge_protocol::{FrameCodec, DEFAULT_MAX_FRAME_SIZE, DEFAULT_MAX_MESSAGE_SIZE};

/// Default listening port.
pub const DEFAULT_PORT: u16 = 9000;

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Network configuration.
    pub network: NetworkConfig,
    /// WebSocket codec configuration.
    pub websocket: WebSocketConfig,
}

impl Config {
    /// Loads configuration from the file named by WSBRIDGE_CONFIG (if set),
    /// then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var_os("WSBRIDGE_CONFIG").map(PathBuf::from);
        Self::load_from(path.as_deref())
    }

    /// Loads configuration from `path` (or defaults), then applies
    /// environment variable overrides and validates the result.
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        self.network.apply_env_overrides();
        self.websocket.apply_env_overrides();
    }

    /// Checks that limits are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "network.max_connections must be greater than 0".into(),
            ));
        }
        if self.network.max_header_bytes < 256 {
            return Err(ConfigError::ValidationError(
                "network.max_header_bytes must be at least 256".into(),
            ));
        }
        if self.websocket.max_frame_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "websocket.max_frame_bytes must be greater than 0".into(),
            ));
        }
        if self.websocket.max_message_bytes < self.websocket.max_frame_bytes {
            return Err(ConfigError::ValidationError(
                "websocket.max_message_bytes must not be smaller than websocket.max_frame_bytes"
                    .into(),
            ));
        }
        Ok(())
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind to.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Seconds allowed for the upgrade request to arrive (0 = no limit).
    pub handshake_timeout_secs: u64,
    /// Maximum size of an HTTP request head in bytes.
    pub max_header_bytes: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            max_connections: 1000,
            handshake_timeout_secs: 10,
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
        }
    }
}

impl NetworkConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("WSBRIDGE_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind_addr = parsed;
            }
        }

        if let Ok(max) = std::env::var("WSBRIDGE_MAX_CONNECTIONS") {
            if let Ok(n) = max.parse() {
                self.max_connections = n;
            }
        }

        if let Ok(timeout) = std::env::var("WSBRIDGE_HANDSHAKE_TIMEOUT") {
            if let Ok(secs) = timeout.parse() {
                self.handshake_timeout_secs = secs;
            }
        }

        if let Ok(max) = std::env::var("WSBRIDGE_MAX_HEADER_BYTES") {
            if let Ok(n) = max.parse() {
                self.max_header_bytes = n;
            }
        }
    }

    /// Returns the handshake timeout, if one is configured.
    pub fn handshake_timeout(&self) -> Option<Duration> {
        if self.handshake_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.handshake_timeout_secs))
        }
    }
}

/// WebSocket codec configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Largest payload a single inbound frame may declare.
    pub max_frame_bytes: u64,
    /// Largest assembled inbound message.
    pub max_message_bytes: u64,
    /// Reject client frames that are not masked.
    pub require_masked: bool,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: DEFAULT_MAX_FRAME_SIZE,
            max_message_bytes: DEFAULT_MAX_MESSAGE_SIZE,
            require_masked: false,
        }
    }
}

impl WebSocketConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(max) = std::env::var("WSBRIDGE_MAX_FRAME_SIZE") {
            if let Ok(n) = max.parse() {
                self.max_frame_bytes = n;
            }
        }

        if let Ok(max) = std::env::var("WSBRIDGE_MAX_MESSAGE_SIZE") {
            if let Ok(n) = max.parse() {
                self.max_message_bytes = n;
            }
        }

        if let Ok(masked) = std::env::var("WSBRIDGE_REQUIRE_MASKED") {
            self.require_masked = masked == "1" || masked.to_lowercase() == "true";
        }
    }

    /// Builds the codec these settings describe.
    pub fn codec(&self) -> FrameCodec {
        FrameCodec::new()
            .with_max_frame_size(self.max_frame_bytes)
            .with_max_message_size(self.max_message_bytes)
            .with_require_masked(self.require_masked)
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Custom serde module for SocketAddr (to handle as string in YAML).
mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S>(addr: &SocketAddr, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.network.bind_addr.port(), DEFAULT_PORT);
        assert_eq!(config.network.handshake_timeout(), Some(Duration::from_secs(10)));
        assert_eq!(config.websocket.max_frame_bytes, 16 * 1024 * 1024);
        assert!(!config.websocket.require_masked);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.network.bind_addr, config.network.bind_addr);
        assert_eq!(
            parsed.websocket.max_message_bytes,
            config.websocket.max_message_bytes
        );
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "network:\n  bind_addr: \"0.0.0.0:8080\"\nwebsocket:\n  require_masked: true"
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.network.bind_addr.port(), 8080);
        assert_eq!(config.network.max_connections, 1000);
        assert!(config.websocket.require_masked);
        assert_eq!(config.websocket.max_frame_bytes, DEFAULT_MAX_FRAME_SIZE);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wsbridge.yaml");

        let mut config = Config::default();
        config.network.handshake_timeout_secs = 0;
        config.save(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.network.handshake_timeout(), None);
    }

    #[test]
    fn test_missing_file() {
        let result = Config::from_file("/nonexistent/wsbridge.yaml");
        assert!(matches!(result, Err(ConfigError::IoError(_, _))));
    }

    #[test]
    fn test_invalid_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "network: [unterminated").unwrap();
        let result = Config::from_file(file.path());
        assert!(matches!(result, Err(ConfigError::ParseError(_, _))));
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.websocket.max_message_bytes = 10;
        config.websocket.max_frame_bytes = 100;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));

        let mut config = Config::default();
        config.network.max_connections = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_codec_from_config() {
        let config = WebSocketConfig {
            max_frame_bytes: 1024,
            max_message_bytes: 4096,
            require_masked: true,
        };
        let codec = config.codec();
        assert_eq!(codec.max_frame_size(), 1024);
        assert_eq!(codec.max_message_size(), 4096);
        assert!(codec.require_masked());
    }
}
