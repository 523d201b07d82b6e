//! Keepalive pump: pings an idle stream so the read deadline on either side
//! doesn't fire.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

pub(crate) async fn ping_pump(
    control_tx: mpsc::Sender<Message>,
    period: Duration,
    cancel: CancellationToken,
) {
    // First ping one period after the link opens.
    let mut ticks = tokio::time::interval_at(Instant::now() + period, period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    while cancel
        .run_until_cancelled(ticks.tick())
        .await
        .is_some()
    {
        if control_tx.send(Message::Ping(Default::default())).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn first_ping_after_one_period() {
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let start = Instant::now();
        let handle = tokio::spawn(ping_pump(tx, Duration::from_secs(15), cancel.clone()));

        assert!(matches!(rx.recv().await, Some(Message::Ping(_))));
        assert!(start.elapsed() >= Duration::from_secs(15));

        assert!(matches!(rx.recv().await, Some(Message::Ping(_))));
        assert!(start.elapsed() >= Duration::from_secs(30));

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn exits_when_writer_is_gone() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let handle = tokio::spawn(ping_pump(tx, Duration::from_secs(1), CancellationToken::new()));
        handle.await.unwrap();
    }
}
