use std::time::Duration;

use tokio_tungstenite::tungstenite;

use telesync_protocol::ProtocolError;

/// Errors from the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("connection refused: {0}")]
    Refused(String),

    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    Closed,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
