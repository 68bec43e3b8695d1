//! Session configuration.

use crate::error::{AsebaError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Number of arrivals aggregated into one frequency estimate.
pub const DEFAULT_FREQUENCY_WINDOW: usize = 10;

/// Length of the zero-filled array returned by reads on an offline session.
pub const DEFAULT_OFFLINE_READ_LEN: usize = 10;

/// Which bus to connect to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusScope {
    /// Per-login session bus.
    #[default]
    Session,
    /// Machine-wide system bus.
    System,
}

/// What happens when an event callback panics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackPolicy {
    /// Log the panic and keep dispatching.
    #[default]
    Isolate,
    /// Tear the session down and return the panic from `run`.
    Abort,
}

/// Session configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Bus to connect to.
    pub scope: BusScope,

    /// Run without a bus connection. Bus operations become no-ops.
    pub offline: bool,

    /// Free event filters left behind by earlier sessions before creating ours.
    pub reclaim_orphans: bool,

    /// Arrivals per frequency estimate.
    /// Default: 10
    pub frequency_window: usize,

    /// Policy for panicking event callbacks.
    pub callback_policy: CallbackPolicy,

    /// Length of the stub array returned by `get` when offline.
    /// Default: 10
    pub offline_read_len: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            scope: BusScope::Session,
            offline: false,
            reclaim_orphans: true,
            frequency_window: DEFAULT_FREQUENCY_WINDOW,
            callback_policy: CallbackPolicy::Isolate,
            offline_read_len: DEFAULT_OFFLINE_READ_LEN,
        }
    }
}

impl SessionConfig {
    /// Configuration for a session with no bus connection.
    pub fn offline() -> Self {
        Self {
            offline: true,
            ..Default::default()
        }
    }

    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: SessionConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Check the configuration for values the session cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.frequency_window == 0 {
            return Err(AsebaError::InvalidConfig(
                "frequency_window must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
