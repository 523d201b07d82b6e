//! Synchronization coordinator.
//!
//! One driver task per feed owns the [`SyncState`] slot and selects over
//! teardown, the session status watch, transport events, and the poll timer.
//! The mode follows the status watch. The poll timer only runs in
//! [`SyncMode::Polling`], so at most one update path writes the slot at any
//! time.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use telesync_protocol::InboundMessage;
use telesync_transport::{ConnectionStatus, TransportEvent, TransportSession};

use crate::source::FeedSource;
use crate::state::{FeedError, Source, SyncMode, SyncState};

/// How a feed is kept in sync.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedConfig {
    /// Used in logs.
    pub name: String,
    /// Inbound message type that carries this feed's value.
    pub stream_kind: String,
    /// When false the feed polls even while the stream is connected.
    pub stream_enabled: bool,
    pub poll_interval: Duration,
    /// Pulls running longer than this count as failed.
    pub pull_timeout: Duration,
}

impl FeedConfig {
    /// Streaming enabled, `stream_kind` equal to `name`, 5 s polling and a
    /// 10 s pull timeout.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            stream_kind: name.clone(),
            name,
            stream_enabled: true,
            poll_interval: Duration::from_secs(5),
            pull_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_stream_kind(mut self, kind: impl Into<String>) -> Self {
        self.stream_kind = kind.into();
        self
    }

    pub fn with_streaming(mut self, enabled: bool) -> Self {
        self.stream_enabled = enabled;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_pull_timeout(mut self, timeout: Duration) -> Self {
        self.pull_timeout = timeout;
        self
    }
}

/// Live handle on a feed.
///
/// Clones share the feed. When the last clone is dropped (or
/// [`unsubscribe`](Self::unsubscribe)d) the poll timer stops, the transport
/// session is disconnected, and the state stops changing.
pub struct Subscription<T> {
    state: watch::Receiver<SyncState<T>>,
    mode: watch::Receiver<SyncMode>,
    guard: Arc<FeedGuard>,
}

struct FeedGuard {
    name: String,
    cancel: CancellationToken,
    session: Option<TransportSession>,
}

impl Drop for FeedGuard {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(session) = &self.session {
            session.disconnect();
        }
        info!(feed = %self.name, "feed torn down");
    }
}

impl<T> Clone for Subscription<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            mode: self.mode.clone(),
            guard: self.guard.clone(),
        }
    }
}

impl<T> Subscription<T>
where
    T: DeserializeOwned + PartialEq + Send + Sync + 'static,
{
    /// Starts a feed that streams over `session` when it is connected and
    /// pulls from `source` otherwise.
    ///
    /// The feed takes ownership of the session and connects it. Must be
    /// called inside a tokio runtime.
    pub fn open<S: FeedSource<T>>(
        config: FeedConfig,
        source: S,
        mut session: TransportSession,
    ) -> Self {
        let events = session.take_events();
        if events.is_none() {
            warn!(feed = %config.name, "session events already taken, feed will only poll");
        }
        let status = session.watch_status();
        if config.stream_enabled {
            session.connect();
        }
        Self::spawn(config, source, events, Some(status), Some(session))
    }

    /// Starts a feed that only polls.
    pub fn polling<S: FeedSource<T>>(config: FeedConfig, source: S) -> Self {
        Self::spawn(config.with_streaming(false), source, None, None, None)
    }

    fn spawn<S: FeedSource<T>>(
        config: FeedConfig,
        source: S,
        events: Option<mpsc::Receiver<TransportEvent>>,
        status: Option<watch::Receiver<ConnectionStatus>>,
        session: Option<TransportSession>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(SyncState::default());
        let (mode_tx, mode_rx) = watch::channel(SyncMode::Polling);
        let cancel = CancellationToken::new();

        info!(
            feed = %config.name,
            streaming = config.stream_enabled,
            interval = ?config.poll_interval,
            "feed started"
        );

        let guard = Arc::new(FeedGuard {
            name: config.name.clone(),
            cancel: cancel.clone(),
            session,
        });

        let coordinator = Coordinator {
            config,
            source,
            state: state_tx,
            mode: mode_tx,
            events,
            status,
            cancel,
        };
        tokio::spawn(coordinator.run());

        Self {
            state: state_rx,
            mode: mode_rx,
            guard,
        }
    }
}

impl<T> Subscription<T> {
    pub fn name(&self) -> &str {
        &self.guard.name
    }

    /// Current state.
    pub fn state(&self) -> SyncState<T>
    where
        T: Clone,
    {
        self.state.borrow().clone()
    }

    /// Waits for the next published state. `None` once the feed is gone.
    pub async fn changed(&mut self) -> Option<SyncState<T>>
    where
        T: Clone,
    {
        self.state.changed().await.ok()?;
        Some(self.state.borrow_and_update().clone())
    }

    /// Receiver for the state slot, for consumers that want to select on it.
    pub fn watch(&self) -> watch::Receiver<SyncState<T>> {
        self.state.clone()
    }

    /// Current delivery mode of the feed.
    pub fn mode(&self) -> SyncMode {
        *self.mode.borrow()
    }

    /// Receiver for mode changes.
    pub fn watch_mode(&self) -> watch::Receiver<SyncMode> {
        self.mode.clone()
    }

    /// Number of live handles on this feed.
    pub fn subscribers(&self) -> usize {
        Arc::strong_count(&self.guard)
    }

    /// Drops this handle. The feed is torn down with the last one.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

enum Step {
    Shutdown,
    Status(Option<ConnectionStatus>),
    Event(Option<TransportEvent>),
    Poll,
}

struct Coordinator<T, S> {
    config: FeedConfig,
    source: S,
    state: watch::Sender<SyncState<T>>,
    mode: watch::Sender<SyncMode>,
    events: Option<mpsc::Receiver<TransportEvent>>,
    /// Session status. Drives the mode: unlike the event stream it never
    /// loses an update.
    status: Option<watch::Receiver<ConnectionStatus>>,
    cancel: CancellationToken,
}

impl<T, S> Coordinator<T, S>
where
    T: DeserializeOwned + PartialEq + Send + Sync + 'static,
    S: FeedSource<T>,
{
    async fn run(mut self) {
        // Zero deadline: the first pull happens right away.
        let poll = tokio::time::sleep(Duration::ZERO);
        tokio::pin!(poll);

        if let Some(current) = self.status.as_mut().map(|rx| *rx.borrow_and_update()) {
            self.on_status(current, poll.as_mut());
        }

        loop {
            let polling = *self.mode.borrow() == SyncMode::Polling;
            let step = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Step::Shutdown,
                status = next_status(&mut self.status) => Step::Status(status),
                event = next_event(&mut self.events) => Step::Event(event),
                _ = &mut poll, if polling => Step::Poll,
            };

            match step {
                Step::Shutdown => break,
                Step::Status(Some(status)) => self.on_status(status, poll.as_mut()),
                Step::Status(None) => {
                    debug!(feed = %self.config.name, "transport session gone");
                    self.status = None;
                    self.enter_polling(poll.as_mut());
                }
                Step::Event(Some(event)) => self.on_event(event),
                Step::Event(None) => self.events = None,
                Step::Poll => {
                    self.pull().await;
                    poll.as_mut()
                        .reset(Instant::now() + self.config.poll_interval);
                }
            }
        }

        self.mode.send_replace(SyncMode::Idle);
        debug!(feed = %self.config.name, "coordinator stopped");
    }

    fn on_status(&mut self, status: ConnectionStatus, poll: Pin<&mut Sleep>) {
        if !status.is_connected() {
            self.enter_polling(poll);
        } else if self.config.stream_enabled {
            self.set_mode(SyncMode::Streaming);
        }
        self.state.send_if_modified(|s| s.apply_status(status));
    }

    fn on_event(&mut self, event: TransportEvent) {
        match event {
            // Mode follows the status watch; events can be dropped under load.
            TransportEvent::Status(status) => {
                trace!(feed = %self.config.name, %status, "status event");
            }
            TransportEvent::Message(msg) => self.on_message(msg),
            TransportEvent::Error { reason } => {
                debug!(feed = %self.config.name, %reason, "stream error");
            }
            TransportEvent::ReconnectScheduled { attempt, delay } => {
                debug!(feed = %self.config.name, attempt, ?delay, "stream reconnect scheduled");
            }
            TransportEvent::RetriesExhausted { attempts } => {
                warn!(
                    feed = %self.config.name,
                    attempts,
                    "stream unavailable, staying on polling"
                );
            }
        }
    }

    fn on_message(&mut self, msg: InboundMessage) {
        if msg.kind != self.config.stream_kind {
            trace!(feed = %self.config.name, kind = %msg.kind, "ignoring message of other type");
            return;
        }
        if *self.mode.borrow() != SyncMode::Streaming {
            trace!(feed = %self.config.name, "message outside streaming mode dropped");
            return;
        }

        match msg.decode::<T>() {
            Ok(value) => {
                let now = Utc::now();
                self.state
                    .send_if_modified(|s| s.apply_value(value, Source::Stream, now));
            }
            Err(e) => {
                warn!(feed = %self.config.name, error = %e, "undecodable stream payload dropped");
            }
        }
    }

    /// Switches to polling and schedules an immediate pull. No-op when
    /// already polling.
    fn enter_polling(&mut self, poll: Pin<&mut Sleep>) {
        if *self.mode.borrow() == SyncMode::Polling {
            return;
        }
        self.set_mode(SyncMode::Polling);
        poll.reset(Instant::now());
    }

    fn set_mode(&mut self, mode: SyncMode) {
        let previous = self.mode.send_replace(mode);
        if previous != mode {
            info!(feed = %self.config.name, from = %previous, to = %mode, "sync mode changed");
        }
    }

    async fn pull(&mut self) {
        let timeout = self.config.pull_timeout;
        let result = tokio::select! {
            _ = self.cancel.cancelled() => return,
            r = tokio::time::timeout(timeout, self.source.pull()) => r,
        };

        match result {
            Ok(Ok(value)) => {
                let now = Utc::now();
                let changed = self
                    .state
                    .send_if_modified(|s| s.apply_value(value, Source::Poll, now));
                trace!(feed = %self.config.name, changed, "pull succeeded");
            }
            Ok(Err(e)) => {
                warn!(feed = %self.config.name, error = %e, "pull failed");
                self.state
                    .send_if_modified(|s| s.apply_error(FeedError::Pull(format!("{e:#}"))));
            }
            Err(_) => {
                warn!(feed = %self.config.name, ?timeout, "pull timed out");
                self.state
                    .send_if_modified(|s| s.apply_error(FeedError::Timeout(timeout)));
            }
        }
    }
}

async fn next_status(status: &mut Option<watch::Receiver<ConnectionStatus>>) -> Option<ConnectionStatus> {
    match status {
        Some(rx) => {
            rx.changed().await.ok()?;
            Some(*rx.borrow_and_update())
        }
        None => std::future::pending().await,
    }
}

async fn next_event(events: &mut Option<mpsc::Receiver<TransportEvent>>) -> Option<TransportEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
