//! Controller configuration
//!
//! Combines the device endpoint, storage locations and the channel table.
//! Every section has defaults, so a config file only needs the fields that
//! differ:
//!
//! ```json
//! {
//!   "device": {"host": "192.168.1.101", "settle_delay_ms": 300},
//!   "channels": {"preset": "thirty_rate"}
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::table::ChannelTable;

/// Complete controller configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub device: DeviceConfig,
    pub storage: StorageConfig,
    pub channels: ChannelTable,
}

/// Device endpoint and link timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub host: String,
    pub port: u16,

    /// Deadline for a single connect attempt
    pub connect_timeout_ms: u64,

    /// Connect attempts before giving up
    pub connect_attempts: u32,

    /// Wait before retry `n` is `backoff_unit * backoff_base^n`
    pub backoff_base: u32,
    pub backoff_unit_ms: u64,

    /// Extra attempts for a failed write
    pub send_retries: u32,

    /// Fixed pause between write attempts
    pub retry_delay_ms: u64,

    /// Minimum gap after a successful write before the next one
    pub settle_delay_ms: u64,

    /// Wait for an `ACK`/`NACK` line after each write (simulators only)
    pub expect_ack: bool,
    pub ack_timeout_ms: u64,
}

/// Where state and history are persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub state_file: PathBuf,
    pub submissions_file: PathBuf,
    pub history_limit: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: "192.168.1.7".to_string(),
            port: 20108,
            connect_timeout_ms: 5_000,
            connect_attempts: 3,
            backoff_base: 2,
            backoff_unit_ms: 1_000,
            send_retries: 1,
            retry_delay_ms: 150,
            settle_delay_ms: 250,
            expect_ack: false,
            ack_timeout_ms: 2_000,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_file: PathBuf::from("forex_state.json"),
            submissions_file: PathBuf::from("forex_submissions.json"),
            history_limit: 5,
        }
    }
}

impl DeviceConfig {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn backoff_unit(&self) -> Duration {
        Duration::from_millis(self.backoff_unit_ms)
    }
}

impl ControllerConfig {
    /// Read a JSON config file; absent fields keep their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Set device endpoint
    pub fn with_endpoint(mut self, host: impl Into<String>, port: u16) -> Self {
        self.device.host = host.into();
        self.device.port = port;
        self
    }

    /// Set channel table
    pub fn with_channels(mut self, channels: ChannelTable) -> Self {
        self.channels = channels;
        self
    }

    /// Put both persisted files in one directory
    pub fn with_data_dir(mut self, dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        self.storage.state_file = dir.join("forex_state.json");
        self.storage.submissions_file = dir.join("forex_submissions.json");
        self
    }

    /// Set link pacing (settle gap and retry pause)
    pub fn with_pacing(mut self, settle: Duration, retry: Duration) -> Self {
        self.device.settle_delay_ms = settle.as_millis() as u64;
        self.device.retry_delay_ms = retry.as_millis() as u64;
        self
    }

    /// Set connect retry policy
    pub fn with_connect_policy(mut self, attempts: u32, backoff_unit: Duration) -> Self {
        self.device.connect_attempts = attempts;
        self.device.backoff_unit_ms = backoff_unit.as_millis() as u64;
        self
    }

    /// Set extra write attempts
    pub fn with_send_retries(mut self, retries: u32) -> Self {
        self.device.send_retries = retries;
        self
    }

    /// Enable the simulator acknowledgement handshake
    pub fn with_ack(mut self, timeout: Duration) -> Self {
        self.device.expect_ack = true;
        self.device.ack_timeout_ms = timeout.as_millis() as u64;
        self
    }
}
