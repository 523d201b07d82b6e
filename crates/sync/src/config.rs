//! Configuration surface.
//!
//! Stored as TOML:
//!
//! ```toml
//! [transport]
//! url = "ws://10.0.0.5:8080/ws"
//! reconnect = "fixed"
//! reconnect_interval_ms = 5000
//! max_reconnect_attempts = 10
//!
//! [polling]
//! interval_ms = 5000
//!
//! [history]
//! max_history = 60
//! throttle_ms = 1000
//!
//! [[feed]]
//! name = "gpu_stats"
//! pull_url = "http://10.0.0.5:8080/api/gpu"
//! ```
//!
//! Only `transport.url` is required.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use telesync_transport::{ReconnectPolicy, TransportConfig};

use crate::coordinator::FeedConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    pub transport: TransportSection,

    #[serde(default)]
    pub polling: PollingSection,

    #[serde(default)]
    pub history: HistorySection,

    #[serde(default, rename = "feed")]
    pub feeds: Vec<FeedSection>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconnectKind {
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportSection {
    pub url: String,

    #[serde(default = "default_reconnect")]
    pub reconnect: ReconnectKind,

    /// Fixed delay, or the first delay of the exponential schedule.
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,

    #[serde(default = "default_reconnect_factor")]
    pub reconnect_factor: f64,

    #[serde(default = "default_reconnect_jitter")]
    pub reconnect_jitter: f64,

    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollingSection {
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,

    #[serde(default = "default_pull_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySection {
    #[serde(default = "default_max_history")]
    pub max_history: usize,

    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,
}

/// One feed to keep in sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedSection {
    pub name: String,

    /// Message type on the stream. Defaults to `name`.
    #[serde(default)]
    pub stream_kind: Option<String>,

    /// REST endpoint used while the stream is unavailable.
    #[serde(default)]
    pub pull_url: Option<String>,

    #[serde(default = "default_true")]
    pub stream: bool,

    /// Overrides `polling.interval_ms` for this feed.
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
}

fn default_reconnect() -> ReconnectKind {
    ReconnectKind::Exponential
}
fn default_reconnect_interval_ms() -> u64 {
    1_000
}
fn default_reconnect_max_ms() -> u64 {
    30_000
}
fn default_reconnect_factor() -> f64 {
    2.0
}
fn default_reconnect_jitter() -> f64 {
    0.25
}
fn default_max_reconnect_attempts() -> u32 {
    10
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_poll_interval_ms() -> u64 {
    5_000
}
fn default_pull_timeout_ms() -> u64 {
    10_000
}
fn default_max_history() -> usize {
    60
}
fn default_throttle_ms() -> u64 {
    1_000
}
fn default_true() -> bool {
    true
}

impl Default for PollingSection {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval_ms(),
            timeout_ms: default_pull_timeout_ms(),
        }
    }
}

impl Default for HistorySection {
    fn default() -> Self {
        Self {
            max_history: default_max_history(),
            throttle_ms: default_throttle_ms(),
        }
    }
}

impl SyncConfig {
    /// Reads and validates a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), feeds = config.feeds.len(), "configuration loaded");
        Ok(config)
    }

    /// Parses and validates a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: SyncConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.transport;
        if t.url.trim().is_empty() {
            return Err(ConfigError::Invalid("transport.url is empty".into()));
        }
        if t.reconnect_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "transport.reconnect_interval_ms must be > 0".into(),
            ));
        }
        if t.reconnect == ReconnectKind::Exponential {
            if t.reconnect_factor < 1.0 {
                return Err(ConfigError::Invalid(
                    "transport.reconnect_factor must be >= 1.0".into(),
                ));
            }
            if !(0.0..=1.0).contains(&t.reconnect_jitter) {
                return Err(ConfigError::Invalid(
                    "transport.reconnect_jitter must be within 0.0..=1.0".into(),
                ));
            }
        }
        if t.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "transport.connect_timeout_ms must be > 0".into(),
            ));
        }
        if self.polling.interval_ms == 0 {
            return Err(ConfigError::Invalid("polling.interval_ms must be > 0".into()));
        }
        if self.polling.timeout_ms == 0 {
            return Err(ConfigError::Invalid("polling.timeout_ms must be > 0".into()));
        }
        if self.history.max_history == 0 {
            return Err(ConfigError::Invalid("history.max_history must be > 0".into()));
        }

        for feed in &self.feeds {
            if feed.name.trim().is_empty() {
                return Err(ConfigError::Invalid("feed.name is empty".into()));
            }
            if feed.poll_interval_ms == Some(0) {
                return Err(ConfigError::Invalid(format!(
                    "feed {}: poll_interval_ms must be > 0",
                    feed.name
                )));
            }
            if !feed.stream && feed.pull_url.is_none() {
                return Err(ConfigError::Invalid(format!(
                    "feed {}: needs a pull_url when streaming is off",
                    feed.name
                )));
            }
        }
        Ok(())
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        let t = &self.transport;
        let interval = Duration::from_millis(t.reconnect_interval_ms);
        match t.reconnect {
            ReconnectKind::Fixed => ReconnectPolicy::fixed(interval),
            ReconnectKind::Exponential => ReconnectPolicy::Exponential {
                initial: interval,
                max: Duration::from_millis(t.reconnect_max_ms).max(interval),
                factor: t.reconnect_factor,
                jitter: t.reconnect_jitter,
            },
        }
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig::new(self.transport.url.clone())
            .with_reconnect(self.reconnect_policy())
            .with_max_reconnect_attempts(self.transport.max_reconnect_attempts)
            .with_connect_timeout(Duration::from_millis(self.transport.connect_timeout_ms))
    }

    /// Coordinator settings for one configured feed.
    pub fn feed_config(&self, feed: &FeedSection) -> FeedConfig {
        let interval = feed.poll_interval_ms.unwrap_or(self.polling.interval_ms);
        FeedConfig::new(feed.name.clone())
            .with_stream_kind(feed.stream_kind.clone().unwrap_or_else(|| feed.name.clone()))
            .with_streaming(feed.stream)
            .with_poll_interval(Duration::from_millis(interval))
            .with_pull_timeout(Duration::from_millis(self.polling.timeout_ms))
    }

    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.history.throttle_ms)
    }
}
