//! Hub configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the hub server.
///
/// All fields are defaulted, so a partial JSON config file only overrides
/// what it names.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubConfig {
    /// Host to bind (default `"0.0.0.0"`).
    pub host: String,
    /// Port to bind (default `9000`, `0` for auto-assign).
    pub port: u16,
    /// Seconds between heartbeat cycles.
    pub heartbeat_interval_secs: u64,
    /// Per-session heartbeat ping bound in seconds.
    pub ping_timeout_secs: u64,
    /// Per-call bound for broadcast/direct remote calls in seconds.
    pub call_timeout_secs: u64,
    /// Seconds between reconciliation sweeps of the network-state store.
    pub reconcile_interval_secs: u64,
    /// Maximum size of a single RPC frame in bytes.
    pub max_frame_bytes: usize,
    /// Outbound frame queue depth per connection.
    pub channel_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 9000,
            heartbeat_interval_secs: 60,
            ping_timeout_secs: 45,
            call_timeout_secs: 45,
            reconcile_interval_secs: 10,
            max_frame_bytes: 1024 * 1024, // 1 MiB
            channel_buffer: 256,
        }
    }
}

impl HubConfig {
    /// Load from a JSON file, falling back to defaults for absent fields.
    ///
    /// A missing file yields the defaults; invalid JSON is an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(?path, "config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Heartbeat cycle interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Heartbeat ping bound.
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs)
    }

    /// Broadcast/direct-call bound.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Reconciliation sweep interval.
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }
}

/// Failure to load a config file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not valid JSON for [`HubConfig`].
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}
