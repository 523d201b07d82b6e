//! The seam between the session and a concrete transport.
//!
//! A [`Connector`] opens a [`Link`]: a pair of channels carrying outbound
//! text frames and inbound [`LinkEvent`]s. The session never touches sockets.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;

/// Something that happened on an open link.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// A text frame, not yet parsed.
    Text(String),
    /// The link failed. No further events follow.
    Error(String),
    /// The remote end closed the link. No further events follow.
    Closed,
}

/// Opens links to a stream endpoint.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, url: &str) -> impl Future<Output = Result<Link, TransportError>> + Send;
}

/// An open connection.
///
/// Dropping the link cancels whatever tasks the connector spawned for it.
#[derive(Debug)]
pub struct Link {
    outbound: mpsc::Sender<String>,
    inbound: mpsc::Receiver<LinkEvent>,
    cancel: CancellationToken,
}

impl Link {
    pub fn new(outbound: mpsc::Sender<String>, inbound: mpsc::Receiver<LinkEvent>) -> Self {
        Self::with_cancel(outbound, inbound, CancellationToken::new())
    }

    /// Creates a link whose teardown also cancels `cancel`.
    pub fn with_cancel(
        outbound: mpsc::Sender<String>,
        inbound: mpsc::Receiver<LinkEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            outbound,
            inbound,
            cancel,
        }
    }

    /// Waits for the next event. A vanished remote reads as `Closed`.
    pub(crate) async fn recv(&mut self) -> LinkEvent {
        self.inbound.recv().await.unwrap_or(LinkEvent::Closed)
    }

    /// Hands a frame to the link without waiting. Frames are never retried.
    pub(crate) fn try_send(&self, text: String) -> Result<(), TransportError> {
        self.outbound.try_send(text).map_err(|e| match e {
            TrySendError::Full(_) => TransportError::Refused("outbound buffer full".into()),
            TrySendError::Closed(_) => TransportError::Closed,
        })
    }

    /// Closes the link.
    pub(crate) fn close(self) {
        drop(self);
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
