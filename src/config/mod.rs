//! # Configuration Management Module
//!
//! Meshping is configured from a single TOML file. Every section has defaults, so a
//! minimal file only needs the radio address:
//!
//! ```toml
//! [responder]
//! ping_reply = "direct"        # or "channel"
//! info_fields = "rssi_snr"     # or "battery_snr"
//! refresh_on_reconnect = false
//! max_reply_bytes = 200
//!
//! [meshtastic]
//! transport = "serial"         # or "tcp"
//! port = "/dev/ttyUSB0"
//! baud_rate = 115200
//! host = "192.168.15.10"
//! tcp_port = 4403
//! channel = 1
//! reconnect_delay_secs = 5
//!
//! [logging]
//! level = "info"
//! file = "meshping.log"
//! log_node_telemetry = false
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use meshping::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     config.validate()?;
//!     println!("Radio: {}", config.meshtastic.address_label());
//!     Ok(())
//! }
//! ```
//!
//! [`Config::validate`] is the only fatal check in the system: a structurally invalid
//! address is reported once at startup instead of being retried forever.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::fs;

/// Hard cap imposed by the Meshtastic text payload size.
pub const MAX_TEXT_PAYLOAD_BYTES: usize = 228;

/// Configuration errors that make the process exit at startup.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("serial transport selected but meshtastic.port is empty")]
    MissingSerialPort,

    #[error("tcp transport selected but meshtastic.host is empty")]
    MissingHost,

    #[error("meshtastic.tcp_port must be non-zero")]
    InvalidTcpPort,

    #[error("meshtastic.baud_rate must be non-zero")]
    InvalidBaudRate,

    #[error("meshtastic.channel {0} is out of range (0-7)")]
    InvalidChannel(u32),

    #[error("meshtastic.idle_tick_ms must be between 10 and 60000 (got {0})")]
    InvalidIdleTick(u64),

    #[error("responder.max_reply_bytes must be between 16 and {max} (got {got})")]
    InvalidReplyLimit { got: usize, max: usize },

    #[error("unknown logging.level '{0}'")]
    InvalidLogLevel(String),
}

/// Where the answer to `ping` goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PingReplyMode {
    /// Unicast back to the node that asked.
    #[default]
    Direct,
    /// Broadcast on `meshtastic.channel`.
    Channel,
}

/// Which telemetry pair the `info` reply carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InfoFields {
    /// `RSSI : <rssi> SNR : <snr>`
    #[default]
    RssiSnr,
    /// `Battery : <battery> SNR : <snr>`
    BatterySnr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    #[default]
    Serial,
    Tcp,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponderConfig {
    #[serde(default)]
    pub ping_reply: PingReplyMode,
    #[serde(default)]
    pub info_fields: InfoFields,
    /// Rebuild the node directory after every reconnect. Off by default: the
    /// directory otherwise carries over until the next `infotest`.
    #[serde(default)]
    pub refresh_on_reconnect: bool,
    #[serde(default = "default_max_reply_bytes")]
    pub max_reply_bytes: usize,
}

fn default_max_reply_bytes() -> usize {
    200
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            ping_reply: PingReplyMode::default(),
            info_fields: InfoFields::default(),
            refresh_on_reconnect: false,
            max_reply_bytes: default_max_reply_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MeshtasticConfig {
    #[serde(default)]
    pub transport: TransportKind,
    /// Serial device path (serial transport).
    #[serde(default)]
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Radio hostname or IP (tcp transport).
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,
    /// Channel index used for broadcast replies.
    #[serde(default = "default_channel")]
    pub channel: u32,
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
    /// Idle tick of the dispatch loop; each tick runs the link health check.
    #[serde(default = "default_idle_tick_ms")]
    pub idle_tick_ms: u64,
    /// How long to wait for the radio's node database after connecting.
    #[serde(default = "default_config_timeout_secs")]
    pub config_timeout_secs: u64,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

fn default_baud_rate() -> u32 {
    115200
}
fn default_tcp_port() -> u16 {
    4403
}
fn default_channel() -> u32 {
    1
}
fn default_reconnect_delay_secs() -> u64 {
    5
}
fn default_idle_tick_ms() -> u64 {
    1000
}
fn default_config_timeout_secs() -> u64 {
    10
}
fn default_heartbeat_secs() -> u64 {
    300
}

impl Default for MeshtasticConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::Serial,
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: default_baud_rate(),
            host: String::new(),
            tcp_port: default_tcp_port(),
            channel: default_channel(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            idle_tick_ms: default_idle_tick_ms(),
            config_timeout_secs: default_config_timeout_secs(),
            heartbeat_secs: default_heartbeat_secs(),
        }
    }
}

impl MeshtasticConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn idle_tick(&self) -> Duration {
        Duration::from_millis(self.idle_tick_ms)
    }

    pub fn config_timeout(&self) -> Duration {
        Duration::from_secs(self.config_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }

    /// Human-readable radio address for logs (`/dev/ttyUSB0@115200` or `host:4403`).
    pub fn address_label(&self) -> String {
        match self.transport {
            TransportKind::Serial => format!("{}@{}", self.port, self.baud_rate),
            TransportKind::Tcp => format!("{}:{}", self.host, self.tcp_port),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub file: Option<String>,
    /// Log every field of every node while building the directory (info level).
    #[serde(default)]
    pub log_node_telemetry: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: Some("meshping.log".to_string()),
            log_node_telemetry: false,
        }
    }
}

impl LoggingConfig {
    pub fn level_filter(&self) -> Option<log::LevelFilter> {
        self.level.parse().ok()
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub responder: ResponderConfig,
    #[serde(default)]
    pub meshtastic: MeshtasticConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Reject configurations that can never produce a working connection.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let m = &self.meshtastic;
        match m.transport {
            TransportKind::Serial => {
                if m.port.trim().is_empty() {
                    return Err(ConfigError::MissingSerialPort);
                }
                if m.baud_rate == 0 {
                    return Err(ConfigError::InvalidBaudRate);
                }
            }
            TransportKind::Tcp => {
                if m.host.trim().is_empty() {
                    return Err(ConfigError::MissingHost);
                }
                if m.tcp_port == 0 {
                    return Err(ConfigError::InvalidTcpPort);
                }
            }
        }
        if m.channel > 7 {
            return Err(ConfigError::InvalidChannel(m.channel));
        }
        if !(10..=60_000).contains(&m.idle_tick_ms) {
            return Err(ConfigError::InvalidIdleTick(m.idle_tick_ms));
        }
        let limit = self.responder.max_reply_bytes;
        if !(16..=MAX_TEXT_PAYLOAD_BYTES).contains(&limit) {
            return Err(ConfigError::InvalidReplyLimit {
                got: limit,
                max: MAX_TEXT_PAYLOAD_BYTES,
            });
        }
        if self.logging.level_filter().is_none() {
            return Err(ConfigError::InvalidLogLevel(self.logging.level.clone()));
        }
        Ok(())
    }
}
