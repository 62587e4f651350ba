/*
[INPUT]:  Endpoint URL, reconnect/heartbeat tuning, environment variables
[OUTPUT]: Validated StreamConfig ready for PriceStreamClient
[POS]:    Configuration layer - connection tuning
[UPDATE]: When adding connection options or changing defaults
*/

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, StreamError};

pub const ENV_URL: &str = "PRICE_STREAM_URL";
pub const ENV_RECONNECT_BASE_MS: &str = "PRICE_STREAM_RECONNECT_BASE_MS";
pub const ENV_MAX_RECONNECT_ATTEMPTS: &str = "PRICE_STREAM_MAX_RECONNECT_ATTEMPTS";
pub const ENV_CONNECT_TIMEOUT_MS: &str = "PRICE_STREAM_CONNECT_TIMEOUT_MS";

/// Connection configuration for a price stream client
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StreamConfig {
    /// Push endpoint (ws:// or wss://)
    pub url: String,
    /// Upper bound on the WebSocket handshake
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Backoff policy applied after abnormal closes
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
    /// Liveness probing; `None` disables it
    #[serde(default = "default_heartbeat")]
    pub heartbeat: Option<HeartbeatConfig>,
}

/// Exponential backoff policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReconnectPolicy {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

/// Heartbeat settings for detecting half-open connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub timeout_ms: u64,
}

impl StreamConfig {
    /// Create a config for `url` with default tuning
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout_ms: default_connect_timeout_ms(),
            reconnect: ReconnectPolicy::default(),
            heartbeat: default_heartbeat(),
        }
    }

    /// Load configuration from `PRICE_STREAM_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup(ENV_URL)
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| StreamError::Config(format!("{ENV_URL} is not set")))?;

        let mut config = Self::new(url.trim());

        if let Some(value) = lookup(ENV_RECONNECT_BASE_MS) {
            config.reconnect.base_delay_ms = parse_env(ENV_RECONNECT_BASE_MS, &value)?;
        }
        if let Some(value) = lookup(ENV_MAX_RECONNECT_ATTEMPTS) {
            config.reconnect.max_attempts = parse_env(ENV_MAX_RECONNECT_ATTEMPTS, &value)?;
        }
        if let Some(value) = lookup(ENV_CONNECT_TIMEOUT_MS) {
            config.connect_timeout_ms = parse_env(ENV_CONNECT_TIMEOUT_MS, &value)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the client spin or never connect
    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(StreamError::Config("url must not be empty".to_string()));
        }
        self.stream_url()?;
        if self.connect_timeout_ms == 0 {
            return Err(StreamError::Config(
                "connect_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if let Some(heartbeat) = &self.heartbeat {
            if heartbeat.ping_interval_ms == 0 {
                return Err(StreamError::Config(
                    "heartbeat.ping_interval_ms must be greater than zero".to_string(),
                ));
            }
            if heartbeat.timeout_ms < heartbeat.ping_interval_ms {
                return Err(StreamError::Config(
                    "heartbeat.timeout_ms must not be shorter than ping_interval_ms".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Parsed endpoint; only ws/wss URLs with a host are usable
    pub fn stream_url(&self) -> Result<Url> {
        let url = Url::parse(self.url.trim())?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(StreamError::InvalidUrl(format!(
                    "unsupported scheme {other:?}, expected ws or wss"
                )));
            }
        }
        if url.host_str().is_none() {
            return Err(StreamError::InvalidUrl(format!("{} has no host", self.url)));
        }
        Ok(url)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl ReconnectPolicy {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl HeartbeatConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: default_ping_interval_ms(),
            timeout_ms: default_heartbeat_timeout_ms(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| StreamError::Config(format!("{key} has invalid value {value:?}")))
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_ping_interval_ms() -> u64 {
    30_000
}

fn default_heartbeat_timeout_ms() -> u64 {
    60_000
}

fn default_heartbeat() -> Option<HeartbeatConfig> {
    Some(HeartbeatConfig::default())
}
