//! Client configuration
//!
//! Settings are plain serde structs with defaults, loadable from TOML.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DialogError, DialogResult};

/// Configuration for a device connection and the skill host on top of it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Identity the connection announces in every message (`$devid`)
    pub device_id: String,

    /// Host of the device server
    pub host: String,

    /// Port of the device server
    pub port: u16,

    /// Use `wss://` instead of `ws://`
    pub secure: bool,

    /// Timeout applied to awaited calls
    pub request_timeout_secs: u64,

    /// Endpoint on which classified utterances arrive
    pub intent_endpoint: String,

    /// Endpoint dispatch results are sent back on
    pub reply_endpoint: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            device_id: String::new(),
            host: "localhost".to_string(),
            port: 5522,
            secure: false,
            request_timeout_secs: 30,
            intent_endpoint: "skill/intent".to_string(),
            reply_endpoint: "skill/reply".to_string(),
        }
    }
}

impl ClientConfig {
    /// Create a configuration for a device with default settings
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            ..Self::default()
        }
    }

    /// Parse a configuration from TOML
    pub fn from_toml_str(source: &str) -> DialogResult<Self> {
        let config: Self = toml::from_str(source).map_err(|e| DialogError::Config {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> DialogResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| DialogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Check invariants that serde defaults cannot express
    pub fn validate(&self) -> DialogResult<()> {
        if self.device_id.trim().is_empty() {
            return Err(DialogError::Config {
                message: "device_id must not be empty".to_string(),
            });
        }
        if self.request_timeout_secs == 0 {
            return Err(DialogError::Config {
                message: "request_timeout_secs must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// WebSocket address of the device server
    pub fn url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }

    /// Timeout applied to awaited calls
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
