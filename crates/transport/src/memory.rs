//! In-process connector.
//!
//! Every successful connect hands the far end of the link to a
//! [`MemoryListener`] as a [`MemoryPeer`], which can push frames, fail the
//! link, or close it. Used for offline dashboards and for exercising the
//! session and coordinator without sockets.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::trace;

use telesync_protocol::OutboundMessage;

use crate::error::TransportError;
use crate::link::{Connector, Link, LinkEvent};

const PEER_BUFFER: usize = 64;

/// Connector producing in-memory links.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    attempts: Arc<AtomicU32>,
    refusing: Arc<AtomicBool>,
    peers: mpsc::UnboundedSender<MemoryPeer>,
}

/// Receives the far end of each link opened through a [`MemoryConnector`].
#[derive(Debug)]
pub struct MemoryListener {
    peers: mpsc::UnboundedReceiver<MemoryPeer>,
}

/// The far end of an in-memory link.
#[derive(Debug)]
pub struct MemoryPeer {
    url: String,
    to_client: mpsc::Sender<LinkEvent>,
    from_client: mpsc::Receiver<String>,
}

impl MemoryConnector {
    pub fn new() -> (Self, MemoryListener) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Self {
            attempts: Arc::new(AtomicU32::new(0)),
            refusing: Arc::new(AtomicBool::new(false)),
            peers: tx,
        };
        (connector, MemoryListener { peers: rx })
    }

    /// While set, every connect attempt fails as refused.
    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Number of connect attempts made so far, refused ones included.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    fn open(&self, url: &str) -> Result<Link, TransportError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.refusing.load(Ordering::SeqCst) {
            trace!(url, attempt, "memory connector refusing");
            return Err(TransportError::Refused(url.to_owned()));
        }

        let (out_tx, out_rx) = mpsc::channel(PEER_BUFFER);
        let (in_tx, in_rx) = mpsc::channel(PEER_BUFFER);
        let peer = MemoryPeer {
            url: url.to_owned(),
            to_client: in_tx,
            from_client: out_rx,
        };
        self.peers
            .send(peer)
            .map_err(|_| TransportError::Refused(format!("{url}: listener dropped")))?;

        Ok(Link::new(out_tx, in_rx))
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, url: &str) -> impl Future<Output = Result<Link, TransportError>> + Send {
        let result = self.open(url);
        async move { result }
    }
}

impl MemoryListener {
    /// Waits for the next link to be opened.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.peers.recv().await
    }
}

impl MemoryPeer {
    /// URL the client connected to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Pushes a raw text frame to the client.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), TransportError> {
        self.to_client
            .send(LinkEvent::Text(text.into()))
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Pushes a `{type, data, timestamp}` frame to the client.
    pub async fn send_json<T: Serialize>(&self, kind: &str, data: &T) -> Result<(), TransportError> {
        let text = OutboundMessage::new(kind, data)?.to_text()?;
        self.send_text(text).await
    }

    /// Next frame the client sent, or `None` once the client side is gone.
    pub async fn recv(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Fails the link with a transport error.
    pub async fn fail(self, reason: impl Into<String>) {
        let _ = self.to_client.send(LinkEvent::Error(reason.into())).await;
    }

    /// Closes the link from the remote side.
    pub async fn close(self) {
        let _ = self.to_client.send(LinkEvent::Closed).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_hands_peer_to_listener() {
        let (connector, mut listener) = MemoryConnector::new();

        let mut link = connector.connect("mem://cluster").await.unwrap();
        let mut peer = listener.accept().await.unwrap();
        assert_eq!(peer.url(), "mem://cluster");
        assert_eq!(connector.attempts(), 1);

        peer.send_text("frame").await.unwrap();
        assert_eq!(link.recv().await, LinkEvent::Text("frame".into()));

        link.try_send("reply".into()).unwrap();
        assert_eq!(peer.recv().await.as_deref(), Some("reply"));

        peer.close().await;
        assert_eq!(link.recv().await, LinkEvent::Closed);
    }

    #[tokio::test]
    async fn refusing_connector_counts_attempts() {
        let (connector, _listener) = MemoryConnector::new();
        connector.set_refusing(true);

        assert!(matches!(
            connector.connect("mem://x").await,
            Err(TransportError::Refused(_))
        ));
        assert!(connector.connect("mem://x").await.is_err());
        assert_eq!(connector.attempts(), 2);

        connector.set_refusing(false);
        assert!(connector.connect("mem://x").await.is_ok());
    }

    #[tokio::test]
    async fn peer_sees_client_drop() {
        let (connector, mut listener) = MemoryConnector::new();
        let link = connector.connect("mem://x").await.unwrap();
        let mut peer = listener.accept().await.unwrap();

        drop(link);
        assert_eq!(peer.recv().await, None);
    }
}
