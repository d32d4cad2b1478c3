//! Application configuration
//!
//! Loaded from a TOML file; every section and field has a default so a
//! partial (or missing) file is fine.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::{Path, PathBuf};

use crate::constants::*;
use crate::error::{Error, Result};
use crate::protocol::PingPayload;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub network: NetworkConfig,
    pub transport: TransportConfig,
    pub identity: IdentityConfig,
    pub ui: UiConfig,
}

/// Socket settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Local address to bind
    pub bind_address: String,
    /// Local UDP port
    pub udp_port: u16,
    /// Port packets are sent to
    pub remote_port: u16,
    /// Directed broadcast address; limited broadcast when unset
    pub broadcast_address: Option<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            udp_port: VBAN_UDP_PORT,
            remote_port: VBAN_UDP_PORT,
            broadcast_address: None,
        }
    }
}

impl NetworkConfig {
    pub fn bind_addr(&self) -> Result<SocketAddrV4> {
        let ip = parse_ipv4(&self.bind_address)?;
        Ok(SocketAddrV4::new(ip, self.udp_port))
    }

    pub fn broadcast(&self) -> Result<Option<Ipv4Addr>> {
        self.broadcast_address.as_deref().map(parse_ipv4).transpose()
    }
}

/// Directory capacities and timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub max_streams: usize,
    pub max_hosts: usize,
    pub max_subscriptions: usize,
    pub housekeeping_interval_ms: u64,
    /// Idle time after which an inbound stream is marked inactive
    pub stale_stream_ms: u64,
    /// Idle time after which an inactive stream slot may be reused
    pub dead_stream_ms: u64,
    /// Minimum time between discovery pings to the same host
    pub ping_retry_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_streams: MAX_STREAMS,
            max_hosts: MAX_HOSTS,
            max_subscriptions: MAX_SUBSCRIPTIONS,
            housekeeping_interval_ms: HOUSEKEEPING_INTERVAL_MS,
            stale_stream_ms: STALE_STREAM_MS,
            dead_stream_ms: DEAD_STREAM_MS,
            ping_retry_ms: PING_RETRY_MS,
        }
    }
}

/// How this node identifies itself in pings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub hostname: String,
    pub user_name: String,
    pub application: String,
    pub device: String,
    pub manufacturer: String,
    /// 24-bit display colour
    pub color: u32,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            hostname: "vban-node".to_string(),
            user_name: String::new(),
            application: env!("CARGO_PKG_NAME").to_string(),
            device: env!("CARGO_PKG_NAME").to_string(),
            manufacturer: String::new(),
            color: 0x0000C0,
        }
    }
}

impl IdentityConfig {
    /// Identification payload advertised by this node
    pub fn ping_payload(&self) -> PingPayload {
        PingPayload {
            host_name: self.hostname.clone(),
            user_name: self.user_name.clone(),
            application_name: self.application.clone(),
            device_name: self.device.clone(),
            manufacturer_name: self.manufacturer.clone(),
            color_rgb: self.color & 0x00FF_FFFF,
            ..PingPayload::default()
        }
    }
}

/// Status server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub http_port: u16,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "127.0.0.1".to_string(),
            http_port: DEFAULT_HTTP_PORT,
        }
    }
}

impl AppConfig {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("org", "vban", "vban-transport")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Parse from TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load from `path`; a missing file yields the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&text)?;
        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load from the default location, falling back to defaults
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }
}

fn parse_ipv4(text: &str) -> Result<Ipv4Addr> {
    text.parse()
        .map_err(|_| Error::Config(format!("invalid IPv4 address '{}'", text)))
}
