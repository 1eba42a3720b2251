//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! A missing credential or required identifier is a startup error: the
//! process exits with a diagnostic before the bridge loop ever runs.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::Result;

/// Environment variable overriding `[api] token`
pub const TOKEN_ENV_VAR: &str = "BRIDGE_API_TOKEN";

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub api: ApiConfig,
    pub link: LinkConfig,
    pub bridge: BridgeConfig,
}

/// Ingestion API configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,

    /// Bearer credential; may be supplied via `BRIDGE_API_TOKEN` instead
    #[serde(default)]
    pub token: String,

    /// Remote identifier for the transmitter status/metadata endpoints
    #[serde(default)]
    pub remote_id: Option<String>,
}

/// Which kind of device link the bridge attaches to
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    /// Packetized vehicle telemetry endpoint (MAVLink over UDP)
    Vehicle,
    /// Byte-stream serial link to an RC transmitter
    Transmitter,
}

/// Device link configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LinkConfig {
    #[serde(default = "default_link_kind")]
    pub kind: LinkKind,

    /// Vehicle endpoint, e.g. "udp:127.0.0.1:14550"
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Serial device path; empty means auto-detect
    #[serde(default)]
    pub serial_port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_connect_timeout_s")]
    pub connect_timeout_s: u64,

    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

/// Bridge loop and delivery timing configuration
#[derive(Debug, Deserialize, Clone)]
pub struct BridgeConfig {
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    #[serde(default = "default_min_submit_interval_ms")]
    pub min_submit_interval_ms: u64,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Consecutive failed reads before Connected becomes Degraded
    #[serde(default = "default_degraded_after")]
    pub degraded_after: u32,

    /// Consecutive failed reads before Degraded becomes Disconnected
    #[serde(default = "default_disconnected_after")]
    pub disconnected_after: u32,

    #[serde(default = "default_reconnect_wait_ms")]
    pub reconnect_wait_ms: u64,
}

// Default value functions
fn default_base_url() -> String { "http://localhost:3001".to_string() }
fn default_api_prefix() -> String { "/api/v1".to_string() }

fn default_link_kind() -> LinkKind { LinkKind::Vehicle }
fn default_endpoint() -> String { "udp:127.0.0.1:14550".to_string() }
fn default_baud_rate() -> u32 { 115_200 }
fn default_connect_timeout_s() -> u64 { 30 }
fn default_read_timeout_ms() -> u64 { 1000 }

fn default_tick_ms() -> u64 { 100 }
fn default_min_submit_interval_ms() -> u64 { 1000 }
fn default_request_timeout_ms() -> u64 { 2000 }
fn default_degraded_after() -> u32 { 10 }
fn default_disconnected_after() -> u32 { 30 }
fn default_reconnect_wait_ms() -> u64 { 5000 }

impl Config {
    /// Load configuration from a TOML file
    ///
    /// The bearer token may be overridden from the `BRIDGE_API_TOKEN`
    /// environment variable, so credentials never have to live on disk.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(token) = std::env::var(TOKEN_ENV_VAR) {
            if !token.is_empty() {
                config.api.token = token;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range,
    /// or if a required credential/identifier is missing.
    pub fn validate(&self) -> Result<()> {
        if self.api.token.is_empty() {
            return Err(crate::error::BridgeError::Config(
                toml::de::Error::custom(format!(
                    "API token is required (set [api] token or {})", TOKEN_ENV_VAR
                ))
            ));
        }

        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://") {
            return Err(crate::error::BridgeError::Config(
                toml::de::Error::custom("base_url must start with http:// or https://")
            ));
        }

        // The transmitter status/metadata endpoints are keyed by remote id
        if self.link.kind == LinkKind::Transmitter {
            match &self.api.remote_id {
                Some(id) if !id.is_empty() => {}
                _ => {
                    return Err(crate::error::BridgeError::Config(
                        toml::de::Error::custom("remote_id is required for transmitter links")
                    ));
                }
            }
        }

        if self.link.kind == LinkKind::Vehicle && self.link.endpoint.is_empty() {
            return Err(crate::error::BridgeError::Config(
                toml::de::Error::custom("endpoint cannot be empty for vehicle links")
            ));
        }

        if ![9600, 19200, 38400, 57600, 115_200, 230_400, 420_000, 921_600]
            .contains(&self.link.baud_rate)
        {
            return Err(crate::error::BridgeError::Config(
                toml::de::Error::custom(
                    "baud_rate must be one of: 9600, 19200, 38400, 57600, 115200, 230400, 420000, 921600"
                )
            ));
        }

        if self.link.connect_timeout_s == 0 || self.link.connect_timeout_s > 300 {
            return Err(crate::error::BridgeError::Config(
                toml::de::Error::custom("connect_timeout_s must be between 1 and 300")
            ));
        }

        // Reads must never stall the loop for more than a second
        if self.link.read_timeout_ms == 0 || self.link.read_timeout_ms > 1000 {
            return Err(crate::error::BridgeError::Config(
                toml::de::Error::custom("read_timeout_ms must be between 1 and 1000")
            ));
        }

        if self.bridge.tick_ms == 0 || self.bridge.tick_ms > 10_000 {
            return Err(crate::error::BridgeError::Config(
                toml::de::Error::custom("tick_ms must be between 1 and 10000")
            ));
        }

        if self.bridge.min_submit_interval_ms == 0 || self.bridge.min_submit_interval_ms > 60_000 {
            return Err(crate::error::BridgeError::Config(
                toml::de::Error::custom("min_submit_interval_ms must be between 1 and 60000")
            ));
        }

        if self.bridge.request_timeout_ms == 0 || self.bridge.request_timeout_ms > 10_000 {
            return Err(crate::error::BridgeError::Config(
                toml::de::Error::custom("request_timeout_ms must be between 1 and 10000")
            ));
        }

        if self.bridge.degraded_after == 0 {
            return Err(crate::error::BridgeError::Config(
                toml::de::Error::custom("degraded_after must be greater than 0")
            ));
        }

        if self.bridge.disconnected_after <= self.bridge.degraded_after {
            return Err(crate::error::BridgeError::Config(
                toml::de::Error::custom("disconnected_after must be greater than degraded_after")
            ));
        }

        if self.bridge.reconnect_wait_ms == 0 || self.bridge.reconnect_wait_ms > 60_000 {
            return Err(crate::error::BridgeError::Config(
                toml::de::Error::custom("reconnect_wait_ms must be between 1 and 60000")
            ));
        }

        Ok(())
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.bridge.tick_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.link.read_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.link.connect_timeout_s)
    }

    pub fn min_submit_interval(&self) -> Duration {
        Duration::from_millis(self.bridge.min_submit_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.bridge.request_timeout_ms)
    }

    pub fn reconnect_wait(&self) -> Duration {
        Duration::from_millis(self.bridge.reconnect_wait_ms)
    }
}
