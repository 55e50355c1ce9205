//! Configuration file handling

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::paths::config_path;
use super::Result;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Orchestration server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Host loop settings
    #[serde(default)]
    pub host: HostConfig,

    /// Session settings
    #[serde(default)]
    pub session: SessionConfig,
}

/// Orchestration server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// WebSocket URL of the orchestration server
    #[serde(default = "default_url")]
    pub url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { url: default_url() }
    }
}

fn default_url() -> String {
    "ws://127.0.0.1:8765/testbridge".to_string()
}

/// Timeout settings in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timeouts {
    /// Default timeout for `wait` commands
    #[serde(default = "default_wait")]
    pub wait_default_ms: u64,

    /// Interval between wait predicate checks
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Default pause for `delay` waits
    #[serde(default = "default_delay")]
    pub delay_default_ms: u64,

    /// Default duration of swipe and drag gestures
    #[serde(default = "default_gesture")]
    pub gesture_default_ms: u64,

    /// Gesture sampling rate
    #[serde(default = "default_gesture_steps")]
    pub gesture_steps_per_sec: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            wait_default_ms: default_wait(),
            poll_interval_ms: default_poll_interval(),
            delay_default_ms: default_delay(),
            gesture_default_ms: default_gesture(),
            gesture_steps_per_sec: default_gesture_steps(),
        }
    }
}

fn default_wait() -> u64 {
    10_000
}
fn default_poll_interval() -> u64 {
    100
}
fn default_delay() -> u64 {
    1_000
}
fn default_gesture() -> u64 {
    300
}
fn default_gesture_steps() -> u64 {
    60
}

/// Host loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// How many times per second the dispatcher queue is drained
    #[serde(default = "default_tick_rate")]
    pub tick_rate_hz: u32,

    /// Runtime version reported in `session_ready`
    #[serde(default = "default_runtime_version")]
    pub runtime_version: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: default_tick_rate(),
            runtime_version: default_runtime_version(),
        }
    }
}

impl HostConfig {
    /// Duration of one host tick
    pub fn tick_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.tick_rate_hz.max(1)))
    }
}

fn default_tick_rate() -> u32 {
    60
}
fn default_runtime_version() -> String {
    format!("tokio-{}", env!("CARGO_PKG_VERSION"))
}

/// Session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Seconds between heartbeat envelopes (0 disables)
    #[serde(default = "default_heartbeat")]
    pub heartbeat_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat(),
        }
    }
}

fn default_heartbeat() -> u64 {
    30
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = config_path() {
            if path.exists() {
                return Self::from_path(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from an explicit file
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| super::Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        toml::from_str(&content).map_err(|e| super::Error::ConfigParse(e.to_string()))
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| super::Error::Config(e.to_string()))
    }
}
