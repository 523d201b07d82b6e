//! WebSocket connector for the telemetry stream.
//!
//! Each link runs three tasks (read, write, keepalive ping) tied to the
//! link's cancellation token.

use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use telesync_protocol::constants::{KEEPALIVE_PERIOD, MAX_FRAME_SIZE, READ_DEADLINE};

use crate::error::TransportError;
use crate::link::{Connector, Link, LinkEvent};
use crate::pumps;

const OUTBOUND_BUFFER: usize = 64;
const INBOUND_BUFFER: usize = 256;
const CONTROL_BUFFER: usize = 8;

/// Opens WebSocket links with `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    max_frame_size: usize,
    keepalive: Duration,
    read_deadline: Duration,
}

impl Default for WsConnector {
    fn default() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
            keepalive: KEEPALIVE_PERIOD,
            read_deadline: READ_DEADLINE,
        }
    }
}

impl WsConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keepalive(mut self, period: Duration) -> Self {
        self.keepalive = period;
        self
    }

    pub fn with_read_deadline(mut self, deadline: Duration) -> Self {
        self.read_deadline = deadline;
        self
    }

    async fn open(self, url: String) -> Result<Link, TransportError> {
        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(self.max_frame_size);
        ws_config.max_frame_size = Some(self.max_frame_size);

        let (ws_stream, _) =
            tokio_tungstenite::connect_async_with_config(url.as_str(), Some(ws_config), false)
                .await?;
        debug!(url = %url, "WebSocket handshake complete");
        let (write, read) = ws_stream.split();

        let (text_tx, text_rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);
        let (inbound_tx, inbound_rx) = mpsc::channel::<LinkEvent>(INBOUND_BUFFER);
        let (control_tx, control_rx) = mpsc::channel::<tungstenite::Message>(CONTROL_BUFFER);
        let cancel = CancellationToken::new();

        tokio::spawn(pumps::write::write_pump(
            write,
            text_rx,
            control_rx,
            cancel.clone(),
        ));
        tokio::spawn(pumps::read::read_pump(
            read,
            inbound_tx,
            control_tx.clone(),
            self.read_deadline,
            cancel.clone(),
        ));
        tokio::spawn(pumps::ping::ping_pump(
            control_tx,
            self.keepalive,
            cancel.clone(),
        ));

        Ok(Link::with_cancel(text_tx, inbound_rx, cancel))
    }
}

impl Connector for WsConnector {
    fn connect(&self, url: &str) -> impl Future<Output = Result<Link, TransportError>> + Send {
        self.clone().open(url.to_owned())
    }
}
