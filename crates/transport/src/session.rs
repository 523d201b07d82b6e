//! Transport session: one logical streaming connection and its retry policy.
//!
//! The handle forwards commands to a driver task that owns all session state.
//! Status lives in a `watch` channel; everything else (status changes,
//! messages, errors, reconnect scheduling) is emitted in order as
//! [`TransportEvent`]s.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use telesync_protocol::{InboundMessage, OutboundMessage};

use crate::error::TransportError;
use crate::link::{Connector, Link, LinkEvent};
use crate::reconnection::RetryBudget;
use crate::types::{ConnectionStatus, TransportConfig, TransportEvent};
use crate::ws_client::WsConnector;

/// Events buffered for the consumer before new ones are dropped.
const EVENT_BUFFER: usize = 1024;

#[derive(Debug)]
enum Command {
    Connect,
    Send(String),
    Disconnect,
}

/// Handle to a transport session.
///
/// Dropping the handle tears the session down.
pub struct TransportSession {
    id: Uuid,
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    events: Option<mpsc::Receiver<TransportEvent>>,
    cancel: CancellationToken,
}

impl TransportSession {
    /// Creates a session driven by `connector`. Must be called inside a tokio
    /// runtime. The session starts `Disconnected`; call [`connect`](Self::connect).
    pub fn new<C: Connector>(config: TransportConfig, connector: C) -> Self {
        let id = Uuid::new_v4();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();

        let driver = Driver {
            id,
            retry: RetryBudget::new(config.max_reconnect_attempts),
            config,
            connector,
            status_tx,
            events_tx,
            link: None,
            retry_at: None,
            cancel: cancel.clone(),
        };
        tokio::spawn(driver.run(commands_rx));

        Self {
            id,
            commands: commands_tx,
            status: status_rx,
            events: Some(events_rx),
            cancel,
        }
    }

    /// Creates a session over WebSocket.
    pub fn websocket(config: TransportConfig) -> Self {
        Self::new(config, WsConnector::new())
    }

    /// Identifier used in this session's log lines.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Starts connecting. No-op while `Connecting` or `Connected`.
    ///
    /// Also cancels any pending reconnect and restores the full reconnect
    /// budget.
    pub fn connect(&self) {
        self.command(Command::Connect);
    }

    /// Sends a `{type, data, timestamp}` frame.
    ///
    /// Rejected with [`TransportError::NotConnected`] unless the session is
    /// `Connected`; nothing is queued for later.
    pub fn send<T: Serialize>(&self, kind: &str, data: &T) -> Result<(), TransportError> {
        let text = OutboundMessage::new(kind, data)?.to_text()?;
        self.send_text(text)
    }

    /// Sends a pre-serialized text frame. Same rules as [`send`](Self::send).
    pub fn send_text(&self, text: String) -> Result<(), TransportError> {
        if !self.status().is_connected() {
            warn!(session = %self.id, "send while not connected, dropping frame");
            return Err(TransportError::NotConnected);
        }
        self.command(Command::Send(text));
        Ok(())
    }

    /// Cancels any pending reconnect, closes the link, and stays
    /// `Disconnected` until the next [`connect`](Self::connect). Idempotent.
    pub fn disconnect(&self) {
        self.command(Command::Disconnect);
    }

    /// Current connection status.
    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Receiver that always holds the latest status. Unlike the event
    /// stream it never drops an update, though it may coalesce them.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Takes the event receiver. Returns `None` after the first call.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<TransportEvent>> {
        self.events.take()
    }

    fn command(&self, cmd: Command) {
        if self.commands.send(cmd).is_err() {
            debug!(session = %self.id, "session driver already stopped");
        }
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

enum Step {
    Shutdown,
    Command(Option<Command>),
    Link(LinkEvent),
    Retry,
}

struct Driver<C> {
    id: Uuid,
    config: TransportConfig,
    connector: C,
    retry: RetryBudget,
    status_tx: watch::Sender<ConnectionStatus>,
    events_tx: mpsc::Sender<TransportEvent>,
    link: Option<Link>,
    retry_at: Option<Instant>,
    cancel: CancellationToken,
}

impl<C: Connector> Driver<C> {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let retry_timer = tokio::time::sleep(Duration::ZERO);
        tokio::pin!(retry_timer);
        let cancel = self.cancel.clone();

        loop {
            let retry_armed = match self.retry_at {
                Some(at) => {
                    retry_timer.as_mut().reset(at);
                    true
                }
                None => false,
            };

            let step = tokio::select! {
                _ = cancel.cancelled() => Step::Shutdown,
                cmd = commands.recv() => Step::Command(cmd),
                event = next_link_event(&mut self.link) => Step::Link(event),
                () = &mut retry_timer, if retry_armed => Step::Retry,
            };

            match step {
                Step::Shutdown | Step::Command(None) => break,
                Step::Command(Some(Command::Connect)) => {
                    if !self.is_active() {
                        self.retry.reset();
                    }
                    self.connect().await;
                }
                Step::Command(Some(Command::Send(text))) => self.send(text),
                Step::Command(Some(Command::Disconnect)) => self.disconnect(),
                Step::Link(event) => self.on_link_event(event),
                Step::Retry => {
                    self.retry_at = None;
                    debug!(session = %self.id, attempt = self.retry.attempts(), "reconnect timer fired");
                    self.connect().await;
                }
            }
        }

        self.disconnect();
        debug!(session = %self.id, "session driver stopped");
    }

    fn is_active(&self) -> bool {
        matches!(
            *self.status_tx.borrow(),
            ConnectionStatus::Connected | ConnectionStatus::Connecting
        )
    }

    async fn connect(&mut self) {
        if self.is_active() {
            trace!(session = %self.id, "connect ignored, already active");
            return;
        }
        self.retry_at = None;
        self.set_status(ConnectionStatus::Connecting);
        info!(session = %self.id, url = %self.config.url, "connecting");

        let timeout = self.config.connect_timeout;
        let attempt = tokio::time::timeout(timeout, self.connector.connect(&self.config.url));
        let result = tokio::select! {
            _ = self.cancel.cancelled() => return,
            r = attempt => r.unwrap_or(Err(TransportError::Timeout(timeout))),
        };

        match result {
            Ok(link) => {
                self.link = Some(link);
                self.retry.reset();
                self.set_status(ConnectionStatus::Connected);
                info!(session = %self.id, url = %self.config.url, "connected");
            }
            Err(e) => {
                warn!(session = %self.id, url = %self.config.url, error = %e, "connect failed");
                self.on_failure(e.to_string());
            }
        }
    }

    fn send(&mut self, text: String) {
        let Some(link) = &self.link else {
            warn!(session = %self.id, "link gone before send, dropping frame");
            return;
        };
        if let Err(e) = link.try_send(text) {
            warn!(session = %self.id, error = %e, "dropping outbound frame");
        }
    }

    fn disconnect(&mut self) {
        self.retry_at = None;
        self.retry.reset();
        if let Some(link) = self.link.take() {
            link.close();
            info!(session = %self.id, "disconnected");
        }
        self.set_status(ConnectionStatus::Disconnected);
    }

    fn on_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Text(text) => match InboundMessage::parse(&text) {
                Ok(msg) => {
                    trace!(session = %self.id, kind = %msg.kind, "frame received");
                    self.emit(TransportEvent::Message(msg));
                }
                Err(e) => warn!(session = %self.id, error = %e, "dropping malformed frame"),
            },
            LinkEvent::Error(reason) => {
                warn!(session = %self.id, %reason, "link failed");
                self.on_failure(reason);
            }
            LinkEvent::Closed => {
                info!(session = %self.id, "link closed by remote");
                self.on_closed();
            }
        }
    }

    fn on_failure(&mut self, reason: String) {
        self.set_status(ConnectionStatus::Error);
        self.emit(TransportEvent::Error { reason });
        self.on_closed();
    }

    fn on_closed(&mut self) {
        self.link = None;
        self.set_status(ConnectionStatus::Disconnected);

        match self.retry.next_attempt() {
            Some(attempt) => {
                let delay = self.config.reconnect.delay_for_attempt(attempt);
                self.retry_at = Some(Instant::now() + delay);
                info!(
                    session = %self.id,
                    attempt,
                    delay_secs = format_args!("{:.1}", delay.as_secs_f64()),
                    "reconnect scheduled"
                );
                self.emit(TransportEvent::ReconnectScheduled { attempt, delay });
            }
            None => {
                let attempts = self.retry.attempts();
                warn!(session = %self.id, attempts, "reconnect attempts exhausted, staying disconnected");
                self.emit(TransportEvent::RetriesExhausted { attempts });
            }
        }
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        let previous = self.status_tx.send_replace(status);
        if previous != status {
            debug!(session = %self.id, from = %previous, to = %status, "status changed");
            self.emit(TransportEvent::Status(status));
        }
    }

    fn emit(&self, event: TransportEvent) {
        use mpsc::error::TrySendError;

        match self.events_tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(ev)) => {
                warn!(session = %self.id, event = ?ev, "event buffer full, dropping event")
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

async fn next_link_event(link: &mut Option<Link>) -> LinkEvent {
    match link {
        Some(link) => link.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryConnector, MemoryListener};
    use crate::reconnection::ReconnectPolicy;
    use serde_json::json;

    fn fixed_config(interval_secs: u64, max_attempts: u32) -> TransportConfig {
        TransportConfig::new("mem://cluster")
            .with_reconnect(ReconnectPolicy::fixed(Duration::from_secs(interval_secs)))
            .with_max_reconnect_attempts(max_attempts)
    }

    fn session(config: TransportConfig) -> (TransportSession, MemoryConnector, MemoryListener) {
        let (connector, listener) = MemoryConnector::new();
        let session = TransportSession::new(config, connector.clone());
        (session, connector, listener)
    }

    async fn next_event(rx: &mut mpsc::Receiver<TransportEvent>) -> TransportEvent {
        tokio::time::timeout(Duration::from_secs(60), rx.recv())
            .await
            .expect("event within timeout")
            .expect("event channel open")
    }

    /// Skips events until one matches.
    async fn wait_for(
        rx: &mut mpsc::Receiver<TransportEvent>,
        pred: impl Fn(&TransportEvent) -> bool,
    ) -> TransportEvent {
        loop {
            let ev = next_event(rx).await;
            if pred(&ev) {
                return ev;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn connect_transitions_and_delivers_messages() {
        let (mut session, _connector, mut listener) = session(fixed_config(5, 3));
        let mut events = session.take_events().unwrap();
        assert!(session.take_events().is_none());
        assert_eq!(session.status(), ConnectionStatus::Disconnected);

        session.connect();
        assert_eq!(
            next_event(&mut events).await,
            TransportEvent::Status(ConnectionStatus::Connecting)
        );
        assert_eq!(
            next_event(&mut events).await,
            TransportEvent::Status(ConnectionStatus::Connected)
        );
        assert!(session.status().is_connected());

        let peer = listener.accept().await.unwrap();
        peer.send_json("health", &json!({"status": "ok"})).await.unwrap();

        match next_event(&mut events).await {
            TransportEvent::Message(msg) => {
                assert_eq!(msg.kind, "health");
                assert_eq!(msg.payload["status"], "ok");
            }
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn connect_is_idempotent_while_connected() {
        let (mut session, connector, _listener) = session(fixed_config(5, 3));
        let mut events = session.take_events().unwrap();

        session.connect();
        wait_for(&mut events, |e| {
            *e == TransportEvent::Status(ConnectionStatus::Connected)
        })
        .await;

        session.connect();
        session.connect();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(connector.attempts(), 1);
        assert!(session.status().is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_frames_are_dropped_without_killing_the_session() {
        let (mut session, _connector, mut listener) = session(fixed_config(5, 3));
        let mut events = session.take_events().unwrap();
        session.connect();
        let peer = listener.accept().await.unwrap();

        peer.send_text("garbage {{{").await.unwrap();
        peer.send_text(r#"{"data": 1}"#).await.unwrap();
        peer.send_json("metrics", &json!({"gpu0": {"temp": 70}})).await.unwrap();

        let ev = wait_for(&mut events, |e| matches!(e, TransportEvent::Message(_))).await;
        match ev {
            TransportEvent::Message(msg) => assert_eq!(msg.kind, "metrics"),
            _ => unreachable!(),
        }
        assert!(session.status().is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn send_only_while_connected() {
        let (mut session, _connector, mut listener) = session(fixed_config(5, 3));
        let mut events = session.take_events().unwrap();

        let err = session.send("ping", &json!({})).unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));

        session.connect();
        wait_for(&mut events, |e| {
            *e == TransportEvent::Status(ConnectionStatus::Connected)
        })
        .await;
        let mut peer = listener.accept().await.unwrap();

        session.send("subscribe", &json!({"feed": "gpu"})).unwrap();
        let text = peer.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "subscribe");
        assert_eq!(value["data"]["feed"], "gpu");
    }

    #[tokio::test(start_paused = true)]
    async fn close_schedules_exactly_one_reconnect_after_interval() {
        let (mut session, connector, mut listener) = session(fixed_config(5, 3));
        let mut events = session.take_events().unwrap();
        session.connect();
        let peer = listener.accept().await.unwrap();
        assert_eq!(connector.attempts(), 1);

        peer.close().await;
        let ev = wait_for(&mut events, |e| {
            matches!(e, TransportEvent::ReconnectScheduled { .. })
        })
        .await;
        assert_eq!(
            ev,
            TransportEvent::ReconnectScheduled {
                attempt: 1,
                delay: Duration::from_secs(5)
            }
        );
        assert_eq!(session.status(), ConnectionStatus::Disconnected);

        tokio::time::sleep(Duration::from_millis(4900)).await;
        assert_eq!(connector.attempts(), 1, "no reconnect before the interval");

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(connector.attempts(), 2, "exactly one reconnect");
        wait_for(&mut events, |e| {
            *e == TransportEvent::Status(ConnectionStatus::Connected)
        })
        .await;

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn link_error_passes_through_error_status() {
        let (mut session, _connector, mut listener) = session(fixed_config(5, 3));
        let mut events = session.take_events().unwrap();
        session.connect();
        let peer = listener.accept().await.unwrap();
        wait_for(&mut events, |e| {
            *e == TransportEvent::Status(ConnectionStatus::Connected)
        })
        .await;

        peer.fail("connection reset").await;

        assert_eq!(
            next_event(&mut events).await,
            TransportEvent::Status(ConnectionStatus::Error)
        );
        assert_eq!(
            next_event(&mut events).await,
            TransportEvent::Error {
                reason: "connection reset".into()
            }
        );
        assert_eq!(
            next_event(&mut events).await,
            TransportEvent::Status(ConnectionStatus::Disconnected)
        );
        assert!(matches!(
            next_event(&mut events).await,
            TransportEvent::ReconnectScheduled { attempt: 1, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_stop_at_max_attempts() {
        // Reconnect every 5s, at most 2 attempts: the initial drop and two
        // failed reconnects make three closes, but only two are retried.
        let (mut session, connector, mut listener) = session(fixed_config(5, 2));
        let mut events = session.take_events().unwrap();
        session.connect();
        let peer = listener.accept().await.unwrap();

        connector.set_refusing(true);
        peer.close().await;

        let mut scheduled = Vec::new();
        loop {
            match next_event(&mut events).await {
                TransportEvent::ReconnectScheduled { attempt, delay } => {
                    assert_eq!(delay, Duration::from_secs(5));
                    scheduled.push(attempt);
                }
                TransportEvent::RetriesExhausted { attempts } => {
                    assert_eq!(attempts, 2);
                    break;
                }
                _ => {}
            }
        }

        assert_eq!(scheduled, vec![1, 2]);
        assert_eq!(connector.attempts(), 3);
        assert_eq!(session.status(), ConnectionStatus::Disconnected);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.attempts(), 3, "no reconnect after exhaustion");
        assert_eq!(session.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_connect_after_exhaustion_starts_fresh() {
        let (mut session, connector, _listener) = session(fixed_config(1, 1));
        let mut events = session.take_events().unwrap();

        connector.set_refusing(true);
        session.connect();
        wait_for(&mut events, |e| {
            matches!(e, TransportEvent::RetriesExhausted { .. })
        })
        .await;
        assert_eq!(connector.attempts(), 2);

        connector.set_refusing(false);
        session.connect();
        wait_for(&mut events, |e| {
            *e == TransportEvent::Status(ConnectionStatus::Connected)
        })
        .await;
        assert_eq!(connector.attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_pending_reconnect() {
        let (mut session, connector, mut listener) = session(fixed_config(5, 3));
        let mut events = session.take_events().unwrap();
        session.connect();
        let peer = listener.accept().await.unwrap();

        peer.close().await;
        wait_for(&mut events, |e| {
            matches!(e, TransportEvent::ReconnectScheduled { .. })
        })
        .await;

        session.disconnect();
        session.disconnect();
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(connector.attempts(), 1);
        assert_eq!(session.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_closes_the_link_without_reconnecting() {
        let (mut session, connector, mut listener) = session(fixed_config(5, 3));
        let mut events = session.take_events().unwrap();
        session.connect();
        let mut peer = listener.accept().await.unwrap();
        wait_for(&mut events, |e| {
            *e == TransportEvent::Status(ConnectionStatus::Connected)
        })
        .await;

        session.disconnect();
        assert_eq!(peer.recv().await, None, "remote sees the link go away");
        assert_eq!(
            next_event(&mut events).await,
            TransportEvent::Status(ConnectionStatus::Disconnected)
        );

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_closes_the_link() {
        let (session, _connector, mut listener) = session(fixed_config(5, 3));
        session.connect();
        let mut peer = listener.accept().await.unwrap();

        drop(session);
        assert_eq!(peer.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_timeout_counts_as_failure() {
        struct Hanging;
        impl Connector for Hanging {
            fn connect(
                &self,
                _url: &str,
            ) -> impl Future<Output = Result<Link, TransportError>> + Send {
                std::future::pending()
            }
        }

        let config = fixed_config(5, 0).with_connect_timeout(Duration::from_secs(2));
        let mut session = TransportSession::new(config, Hanging);
        let mut events = session.take_events().unwrap();
        session.connect();

        let ev = wait_for(&mut events, |e| matches!(e, TransportEvent::Error { .. })).await;
        match ev {
            TransportEvent::Error { reason } => assert!(reason.contains("timed out")),
            _ => unreachable!(),
        }
        wait_for(&mut events, |e| {
            matches!(e, TransportEvent::RetriesExhausted { attempts: 0 })
        })
        .await;
    }
}
