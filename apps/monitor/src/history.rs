//! Per-feed metric history fed from feed updates.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde_json::Value;

use telesync_history::{IngestOutcome, MetricHistoryStore};

/// One history store per feed, so a busy feed's throttle window never
/// swallows another feed's samples.
#[derive(Debug)]
pub struct HistoryBook {
    stores: BTreeMap<String, MetricHistoryStore>,
    max_history: usize,
    throttle: Duration,
}

impl HistoryBook {
    pub fn new(max_history: usize, throttle: Duration) -> Self {
        Self {
            stores: BTreeMap::new(),
            max_history,
            throttle,
        }
    }

    /// Ingests a feed value. Returns how many keys were appended.
    pub fn apply(&mut self, feed: &str, value: &Value) -> usize {
        self.apply_at(feed, value, Instant::now())
    }

    pub fn apply_at(&mut self, feed: &str, value: &Value, now: Instant) -> usize {
        let (max_history, throttle) = (self.max_history, self.throttle);
        let store = self
            .stores
            .entry(feed.to_owned())
            .or_insert_with(|| MetricHistoryStore::new(max_history, throttle));

        store
            .ingest_json_at(value, now)
            .iter()
            .filter(|(_, o)| *o == IngestOutcome::Accepted)
            .count()
    }

    #[cfg(test)]
    pub(crate) fn store(&self, feed: &str) -> Option<&MetricHistoryStore> {
        self.stores.get(feed)
    }

    /// One line per tracked key: `feed/key dim=latest(len) ...`.
    pub fn summary(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for (feed, store) in &self.stores {
            for key in store.keys() {
                let Some(series) = store.series(key) else {
                    continue;
                };
                let dims: Vec<String> = series
                    .names()
                    .filter_map(|name| {
                        let len = series.dimension(name)?.len();
                        let latest = series.latest(name)?;
                        Some(format!("{name}={latest}({len})"))
                    })
                    .collect();
                lines.push(format!("{feed}/{key} {}", dims.join(" ")));
            }
        }
        lines
    }
}
