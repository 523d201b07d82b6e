//! Public types for the transport session.

use std::fmt;
use std::time::Duration;

use telesync_protocol::InboundMessage;
use telesync_protocol::constants::CONNECT_TIMEOUT;

use crate::reconnection::ReconnectPolicy;

/// Default cap on consecutive reconnect attempts.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Lifecycle state of a transport session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    /// Handshake in progress.
    Connecting,
    /// Link is open; sends are accepted.
    Connected,
    /// No link. Either never connected, explicitly disconnected, waiting for a
    /// scheduled reconnect, or out of reconnect attempts.
    Disconnected,
    /// The link failed. Transient: the session moves on to `Disconnected`.
    Error,
}

impl ConnectionStatus {
    pub fn is_connected(self) -> bool {
        self == ConnectionStatus::Connected
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Events emitted by a session, in the order they happened.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The session moved to a new status.
    Status(ConnectionStatus),
    /// A well-formed frame arrived.
    Message(InboundMessage),
    /// The link failed or could not be opened.
    Error { reason: String },
    /// A reconnect was scheduled after an unexpected close.
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// The reconnect budget is spent; the session stays disconnected until
    /// `connect()` is called again.
    RetriesExhausted { attempts: u32 },
}

/// Configuration for a single transport session.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Stream endpoint, e.g. `ws://10.0.0.5:8080/ws`.
    pub url: String,
    /// Delay schedule between reconnect attempts.
    pub reconnect: ReconnectPolicy,
    /// Consecutive failed attempts allowed before giving up.
    pub max_reconnect_attempts: u32,
    /// Upper bound on a single connect attempt.
    pub connect_timeout: Duration,
}

impl TransportConfig {
    /// Creates a config for `url` with the default reconnect behavior.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectPolicy::default(),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_status_display() {
        assert_eq!(ConnectionStatus::Connecting.to_string(), "connecting");
        assert_eq!(ConnectionStatus::Connected.to_string(), "connected");
        assert_eq!(ConnectionStatus::Disconnected.to_string(), "disconnected");
        assert_eq!(ConnectionStatus::Error.to_string(), "error");
    }

    #[test]
    fn only_connected_is_connected() {
        assert!(ConnectionStatus::Connected.is_connected());
        assert!(!ConnectionStatus::Connecting.is_connected());
        assert!(!ConnectionStatus::Disconnected.is_connected());
        assert!(!ConnectionStatus::Error.is_connected());
    }

    #[test]
    fn transport_config_builders() {
        let config = TransportConfig::new("ws://cluster.local/ws")
            .with_reconnect(ReconnectPolicy::fixed(Duration::from_secs(5)))
            .with_max_reconnect_attempts(2)
            .with_connect_timeout(Duration::from_secs(1));

        assert_eq!(config.url, "ws://cluster.local/ws");
        assert_eq!(config.max_reconnect_attempts, 2);
        assert_eq!(config.connect_timeout, Duration::from_secs(1));
        assert_eq!(
            config.reconnect,
            ReconnectPolicy::Fixed {
                interval: Duration::from_secs(5)
            }
        );
    }

    #[test]
    fn transport_config_defaults() {
        let config = TransportConfig::new("ws://x");
        assert_eq!(config.max_reconnect_attempts, DEFAULT_MAX_RECONNECT_ATTEMPTS);
        assert_eq!(config.connect_timeout, CONNECT_TIMEOUT);
        assert_eq!(config.reconnect, ReconnectPolicy::default());
    }
}
