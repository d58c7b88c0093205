//! Configuration system for Beam
//!
//! Supports TOML configuration files with sensible defaults.
//! Configuration is loaded from:
//! - macOS: ~/Library/Application Support/beam/config.toml
//! - Linux: ~/.config/beam/config.toml
//! - Windows: %APPDATA%/beam/config.toml

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::frame::validate_chunk_size;
use crate::{
    CHUNK_SIZE, DEFAULT_MAX_INCOMING_BYTES, DEFAULT_MAX_UPLOAD_BYTES,
    DEFAULT_NEGOTIATION_TIMEOUT_SECS, DEFAULT_SIGNAL_PORT,
};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Relay server settings
    pub signal: SignalConfig,
    /// Peer session settings
    pub peer: PeerConfig,
    /// File transfer settings
    pub transfer: TransferConfig,
}

/// Relay server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// Relay port
    pub port: u16,
    /// Bind address
    pub bind: IpAddr,
    /// Maximum members per room
    pub max_members_per_room: usize,
    /// Where uploaded files are stored and served from
    pub upload_dir: PathBuf,
    /// Largest accepted upload body, in bytes
    pub max_upload_bytes: usize,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_SIGNAL_PORT,
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            max_members_per_room: 2,
            upload_dir: PathBuf::from("uploads"),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

/// Peer session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Relay WebSocket URL
    pub signal_url: String,
    /// STUN/TURN server URLs handed to the peer connection as-is
    pub ice_servers: Vec<String>,
    /// Seconds to wait for the channel to open once negotiation starts
    pub negotiation_timeout_secs: u64,
    /// Label of the data channel created by the initiator
    pub channel_label: String,
    /// HTTP base of the relay's upload endpoint (derived from `signal_url` if None)
    pub upload_url: Option<String>,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            signal_url: format!("ws://localhost:{}", DEFAULT_SIGNAL_PORT),
            ice_servers: vec!["stun:stun.l.google.com:19302".into()],
            negotiation_timeout_secs: DEFAULT_NEGOTIATION_TIMEOUT_SECS,
            channel_label: "file".into(),
            upload_url: None,
        }
    }
}

impl PeerConfig {
    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_secs(self.negotiation_timeout_secs)
    }

    /// HTTP base URL for uploads and downloads on the relay
    ///
    /// `ws://` and `wss://` relay URLs map to `http://` and `https://`.
    pub fn upload_base(&self) -> Result<Url, ConfigError> {
        let raw = self.upload_url.as_deref().unwrap_or(&self.signal_url);
        let mut url = Url::parse(raw)
            .map_err(|e| ConfigError::Invalid(format!("relay url {:?}: {}", raw, e)))?;

        let scheme = match url.scheme() {
            "ws" => "http",
            "wss" => "https",
            "http" | "https" => return Ok(url),
            other => {
                return Err(ConfigError::Invalid(format!(
                    "relay url {:?}: unsupported scheme {}",
                    raw, other
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| ConfigError::Invalid(format!("relay url {:?}: cannot use {}", raw, scheme)))?;
        Ok(url)
    }
}

/// How `beam send` moves the file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransferStrategy {
    /// Straight to the other peer over the data channel
    #[default]
    PeerToPeer,
    /// Uploaded to the relay, which tells the room where to fetch it
    Upload,
}

/// File transfer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Data frame size in bytes; must match the remote peer
    pub chunk_size: usize,
    /// Largest incoming file accepted, in bytes
    pub max_incoming_bytes: u64,
    /// Where received files are written (current directory if None)
    pub download_dir: Option<PathBuf>,
    /// Peer-to-peer or store-and-forward through the relay
    pub strategy: TransferStrategy,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            max_incoming_bytes: DEFAULT_MAX_INCOMING_BYTES,
            download_dir: None,
            strategy: TransferStrategy::PeerToPeer,
        }
    }
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Self {
        match Self::default_path() {
            Some(path) => Self::load_from(&path).unwrap_or_else(|e| {
                warn!("Failed to load config from {:?}: {}, using defaults", path, e);
                Self::default()
            }),
            None => {
                debug!("No config directory found, using defaults");
                Self::default()
            }
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!("Config file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(e.to_string()))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;

        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::Io(e.to_string()))?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;

        std::fs::write(path, content)
            .map_err(|e| ConfigError::Io(e.to_string()))?;

        info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Check values that would break the wire contract or the relay
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_chunk_size(self.transfer.chunk_size)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        if self.signal.max_members_per_room == 0 {
            return Err(ConfigError::Invalid(
                "signal.max_members_per_room must be at least 1".into(),
            ));
        }
        if self.transfer.strategy == TransferStrategy::Upload {
            self.peer.upload_base()?;
        }
        Ok(())
    }

    /// Get the default config file path
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "beam", "beam")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Directory received files are written to
    pub fn download_dir(&self) -> PathBuf {
        self.transfer
            .download_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Generate a sample configuration file content
    pub fn sample() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

/// Configuration errors
#[derive(Debug, Clone)]
pub enum ConfigError {
    /// I/O error
    Io(String),
    /// Parse error
    Parse(String),
    /// Serialization error
    Serialize(String),
    /// A value is out of range
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "I/O error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Serialize(e) => write!(f, "Serialization error: {}", e),
            ConfigError::Invalid(e) => write!(f, "Invalid configuration: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.signal.port, 5000);
        assert_eq!(config.signal.max_members_per_room, 2);
        assert_eq!(config.transfer.chunk_size, 16 * 1024);
        assert_eq!(config.peer.negotiation_timeout(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config() {
        let toml_str = r#"
            [peer]
            signal_url = "wss://relay.example"
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.peer.signal_url, "wss://relay.example");
        // Other values should be defaults
        assert_eq!(config.peer.channel_label, "file");
        assert_eq!(config.signal.port, 5000);
    }

    #[test]
    fn test_sample_config() {
        let sample = Config::sample();
        assert!(sample.contains("[signal]"));
        assert!(sample.contains("[peer]"));
        assert!(sample.contains("[transfer]"));
    }

    #[test]
    fn test_config_load_missing() {
        let config = Config::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.signal.port, 5000); // Should use defaults
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.transfer.chunk_size = 64 * 1024;
        config.peer.ice_servers = vec![];
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.transfer.chunk_size, 64 * 1024);
        assert!(loaded.peer.ice_servers.is_empty());
    }

    #[test]
    fn test_upload_base_follows_relay_url() {
        let mut peer = PeerConfig::default();
        assert_eq!(peer.upload_base().unwrap().as_str(), "http://localhost:5000/");

        peer.signal_url = "wss://relay.example/ws".into();
        assert_eq!(peer.upload_base().unwrap().as_str(), "https://relay.example/ws");

        peer.upload_url = Some("https://files.example/".into());
        assert_eq!(peer.upload_base().unwrap().as_str(), "https://files.example/");

        peer.upload_url = Some("ftp://files.example/".into());
        assert!(matches!(peer.upload_base(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_upload_strategy_from_toml() {
        let toml_str = r#"
            [transfer]
            strategy = "upload"

            [signal]
            upload_dir = "/srv/beam"
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.transfer.strategy, TransferStrategy::Upload);
        assert_eq!(config.signal.upload_dir, PathBuf::from("/srv/beam"));
        assert!(config.validate().is_ok());
        assert_eq!(Config::default().transfer.strategy, TransferStrategy::PeerToPeer);
    }

    #[test]
    fn test_invalid_chunk_size_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[transfer]\nchunk_size = 0\n").unwrap();

        assert!(matches!(Config::load_from(&path), Err(ConfigError::Invalid(_))));
    }
}
