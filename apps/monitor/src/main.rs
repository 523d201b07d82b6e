//! Telesync monitor entry point.
//!
//! Keeps every configured feed in sync against the cluster and logs state
//! changes plus a periodic history summary.
//!
//! Usage: `telesync-monitor [config.toml]` (defaults to `telesync.toml`).

mod history;
mod http_source;

use std::time::Duration;

use anyhow::Context;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::EnvFilter;

use telesync_sync::config::FeedSection;
use telesync_sync::{Subscription, SyncConfig, SyncState};
use telesync_transport::TransportSession;

use crate::history::HistoryBook;
use crate::http_source::{HttpJsonSource, NoPullSource};

const DEFAULT_CONFIG: &str = "telesync.toml";
const SUMMARY_PERIOD: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting telesync monitor"
    );

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG.to_owned());
    let config =
        SyncConfig::load(&path).with_context(|| format!("loading configuration from {path}"))?;

    if config.feeds.is_empty() {
        anyhow::bail!("{path}: no [[feed]] entries configured");
    }

    let http = reqwest::Client::builder()
        .build()
        .context("building HTTP client")?;

    let (updates_tx, updates_rx) = mpsc::channel(256);
    let mut subscriptions = Vec::with_capacity(config.feeds.len());

    for feed in &config.feeds {
        let sub = open_feed(&config, feed, &http);
        tokio::spawn(forward_updates(
            sub.name().to_owned(),
            sub.watch(),
            updates_tx.clone(),
        ));
        subscriptions.push(sub);
    }
    drop(updates_tx);

    let book = HistoryBook::new(config.history.max_history, config.throttle());
    let history = tokio::spawn(record_history(book, updates_rx));

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    tracing::info!("shutting down");

    for sub in subscriptions {
        sub.unsubscribe();
    }
    history.await.context("history task panicked")?;
    Ok(())
}

fn open_feed(
    config: &SyncConfig,
    feed: &FeedSection,
    http: &reqwest::Client,
) -> Subscription<Value> {
    let feed_config = config.feed_config(feed);
    let session = TransportSession::websocket(config.transport_config());

    match &feed.pull_url {
        Some(url) => {
            let source = HttpJsonSource::new(http.clone(), url.clone());
            tracing::info!(feed = %feed.name, pull_url = %source.url(), "feed configured");
            Subscription::open(feed_config, source, session)
        }
        None => {
            tracing::info!(feed = %feed.name, "feed configured without pull endpoint");
            Subscription::open(feed_config, NoPullSource::new(feed.name.clone()), session)
        }
    }
}

/// Logs each state change and forwards new values to the history task.
/// Ends when the feed is torn down.
async fn forward_updates(
    name: String,
    mut state_rx: watch::Receiver<SyncState<Value>>,
    updates: mpsc::Sender<(String, Value)>,
) {
    while state_rx.changed().await.is_ok() {
        let state = state_rx.borrow_and_update().clone();
        log_state(&name, &state);

        if let Some(value) = state.value
            && updates.send((name.clone(), value)).await.is_err()
        {
            break;
        }
    }
}

fn log_state(feed: &str, state: &SyncState<Value>) {
    match &state.error {
        Some(error) => tracing::warn!(
            feed,
            stream = %state.stream_status,
            has_value = state.value.is_some(),
            %error,
            "feed degraded"
        ),
        None => tracing::debug!(
            feed,
            stream = %state.stream_status,
            source = ?state.source,
            loading = state.is_loading,
            "feed updated"
        ),
    }
}

async fn record_history(mut book: HistoryBook, mut updates: mpsc::Receiver<(String, Value)>) {
    let mut ticker = tokio::time::interval(SUMMARY_PERIOD);
    ticker.tick().await;

    loop {
        tokio::select! {
            update = updates.recv() => {
                let Some((feed, value)) = update else { break };
                let accepted = book.apply(&feed, &value);
                tracing::trace!(feed = %feed, accepted, "history updated");
            }
            _ = ticker.tick() => {
                for line in book.summary() {
                    tracing::info!("{line}");
                }
            }
        }
    }
}
