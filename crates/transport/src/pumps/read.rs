//! Read pump: turns socket frames into [`LinkEvent`]s.

use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::link::LinkEvent;

/// Reads frames until the socket closes, fails, or goes silent.
///
/// Any incoming frame resets the read deadline. When nothing arrives within
/// `deadline` the link is reported as failed. Exactly one terminal event
/// (`Error` or `Closed`) is sent unless the pump was cancelled.
pub(crate) async fn read_pump<S>(
    mut read: S,
    inbound_tx: mpsc::Sender<LinkEvent>,
    control_tx: mpsc::Sender<tungstenite::Message>,
    deadline: Duration,
    cancel: CancellationToken,
) where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    let read_deadline = tokio::time::sleep(deadline);
    tokio::pin!(read_deadline);

    let terminal = loop {
        tokio::select! {
            _ = cancel.cancelled() => return,

            () = &mut read_deadline => {
                warn!(?deadline, "read deadline elapsed, link is dead");
                break LinkEvent::Error(format!("no frames received within {deadline:?}"));
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(msg)) => {
                        read_deadline.as_mut().reset(tokio::time::Instant::now() + deadline);

                        match msg {
                            tungstenite::Message::Text(text) => {
                                let event = LinkEvent::Text(text.as_str().to_owned());
                                if inbound_tx.send(event).await.is_err() {
                                    return;
                                }
                            }
                            tungstenite::Message::Ping(data) => {
                                trace!("received ping, sending pong");
                                let _ = control_tx.send(tungstenite::Message::Pong(data)).await;
                            }
                            tungstenite::Message::Pong(_) => {
                                trace!("received pong");
                            }
                            tungstenite::Message::Close(frame) => {
                                debug!(?frame, "received close frame");
                                break LinkEvent::Closed;
                            }
                            _ => trace!("ignoring non-text frame"),
                        }
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket read error: {e}");
                        break LinkEvent::Error(e.to_string());
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break LinkEvent::Closed;
                    }
                }
            }
        }
    };

    let _ = inbound_tx.send(terminal).await;
}
