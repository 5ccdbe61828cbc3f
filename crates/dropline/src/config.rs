//! Peer configuration.
//!
//! Every field has a default, so a config file only needs the values it
//! changes. Durations are written in milliseconds.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use dropline_core::DEFAULT_CHUNK_SIZE;
use dropline_sync::{ShareLimits, DEFAULT_MAX_FILE_SIZE};

use crate::error::{PeerError, Result};

/// Device label used until the user picks one.
pub const DEFAULT_DEVICE_NAME: &str = "Unnamed device";

/// Bounded exponential back-off for connecting to the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Attempts before giving up, including the first.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay_ms: 1_000,
            max_delay_ms: 10_000,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `retry` (0-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry).unwrap_or(u64::MAX);
        let delay = self.initial_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

/// Configuration for a [`Peer`](crate::Peer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Address of the relay; only meaningful to network channel adapters.
    pub relay_url: String,
    pub device_name: String,
    /// Bytes per chunk.
    pub chunk_size: usize,
    /// Files of this size or larger are not shared.
    pub max_file_size: u64,
    pub reconnect: ReconnectPolicy,
    /// Abandon a download after this long without a chunk. `None` keeps
    /// downloads forever.
    pub download_idle_timeout_ms: Option<u64>,
    /// How often [`Peer::run`](crate::Peer::run) looks for idle downloads.
    pub sweep_interval_ms: u64,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            relay_url: String::new(),
            device_name: DEFAULT_DEVICE_NAME.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            reconnect: ReconnectPolicy::default(),
            download_idle_timeout_ms: Some(300_000),
            sweep_interval_ms: 5_000,
        }
    }
}

impl PeerConfig {
    /// Parse a JSON config.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| PeerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Reject values the engines cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(PeerError::Config("chunk_size must be positive".into()));
        }
        if self.reconnect.max_attempts == 0 {
            return Err(PeerError::Config("reconnect.max_attempts must be positive".into()));
        }
        if self.sweep_interval_ms == 0 {
            return Err(PeerError::Config("sweep_interval_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn share_limits(&self) -> ShareLimits {
        ShareLimits {
            chunk_size: self.chunk_size,
            max_file_size: self.max_file_size,
        }
    }

    pub fn download_idle_timeout(&self) -> Option<Duration> {
        self.download_idle_timeout_ms.map(Duration::from_millis)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}
