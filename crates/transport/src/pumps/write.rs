//! Write pump: serialises outbound text frames and control frames onto the
//! socket.

use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{error, trace};

pub(crate) async fn write_pump<S>(
    mut write: S,
    mut text_rx: mpsc::Receiver<String>,
    mut control_rx: mpsc::Receiver<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => break,
            text = text_rx.recv() => match text {
                Some(t) => tungstenite::Message::Text(t.into()),
                None => break,
            },
            Some(control) = control_rx.recv() => control,
        };

        trace!("writing frame");
        if let Err(e) = write.send(msg).await {
            error!("WebSocket write error: {e}");
            break;
        }
    }

    let _ = write.send(tungstenite::Message::Close(None)).await;
}
