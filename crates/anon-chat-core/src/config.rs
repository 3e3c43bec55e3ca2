//! Client configuration.
//!
//! Read from a TOML file; every field has a default so an absent file or a
//! partial one is fine.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable overriding [`ChatConfig::server_url`].
pub const SERVER_URL_ENV: &str = "ANON_CHAT_SERVER_URL";

const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:5000/chat";

const DEFAULT_WELCOME: &str = "👋 Welcome! You're in a safe space. Feel free to share whatever is on your mind, we're here for you.";

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Chat client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// WebSocket endpoint of the chat backend.
    pub server_url: String,

    /// Override for the identity file location.
    pub identity_path: Option<PathBuf>,

    /// Reconnect backoff.
    pub reconnect: ReconnectConfig,

    /// Retain at most this many messages; unbounded when unset.
    pub history_limit: Option<usize>,

    /// Counsellor greeting shown when the chat opens.
    pub welcome_message: Option<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            identity_path: None,
            reconnect: ReconnectConfig::default(),
            history_limit: None,
            welcome_message: Some(DEFAULT_WELCOME.to_string()),
        }
    }
}

impl ChatConfig {
    /// Load from a TOML file, then apply environment overrides.
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No config at {}, using defaults", path.display());
                Self::default()
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        Ok(config.with_server_url_override(std::env::var(SERVER_URL_ENV).ok()))
    }

    /// Parse TOML content.
    ///
    /// # Errors
    /// Returns error on invalid TOML or mistyped fields.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Replace the server URL when an override is present and non-empty.
    #[must_use]
    pub fn with_server_url_override(mut self, url: Option<String>) -> Self {
        if let Some(url) = url.filter(|u| !u.trim().is_empty()) {
            self.server_url = url;
        }
        self
    }
}

/// Bounded exponential backoff for reconnect attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

impl ReconnectConfig {
    /// Delay before reconnect attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let cap = self.max_delay_ms.max(1);
        let base = self.initial_delay_ms.min(cap);
        let exponent = i32::try_from(attempt.saturating_sub(1).min(64)).unwrap_or(64);
        let scaled = (base as f64) * self.multiplier.max(1.0).powi(exponent);
        let millis = if scaled.is_finite() && scaled < cap as f64 {
            scaled as u64
        } else {
            cap
        };
        Duration::from_millis(millis)
    }
}
