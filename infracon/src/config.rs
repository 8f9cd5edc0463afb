//! Console configuration.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ConsoleError, Result};

/// Interval between two job status queries, shared by every poller.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 3000;

/// Per-request HTTP timeout.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Connection and polling settings for one orchestrator.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConsoleConfig {
    /// API endpoint, e.g. `http://mgmt.example:8080/client/api`
    pub endpoint: String,
    /// Session key sent along with every command, if logged in.
    pub session_key: Option<String>,
    pub poll_interval_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080/client/api".to_string(),
            session_key: None,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl ConsoleConfig {
    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConsoleError::Config(format!("{}: {}", path.display(), e)))?;
        let config: ConsoleConfig = serde_json::from_str(&raw)
            .map_err(|e| ConsoleError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(ConsoleError::Config("endpoint must not be empty".to_string()));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConsoleError::Config(
                "poll interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
