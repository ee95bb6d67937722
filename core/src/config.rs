//! Client configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Request timeout applied to every call.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
/// Advertised retry count. Nothing in this crate retries; callers that want
/// retries read this value and drive them themselves.
pub const DEFAULT_RETRY_COUNT: u32 = 3;

/// Settings for `KitchenApi`. Deserializable so a host can pass it as JSON.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub retry_count: u32,
    /// Log request and response bodies.
    pub verbose_logging: bool,
    /// Where to persist the token pair. `None` keeps it in memory.
    pub session_file: Option<PathBuf>,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            retry_count: DEFAULT_RETRY_COUNT,
            verbose_logging: false,
            session_file: None,
        }
    }
}
