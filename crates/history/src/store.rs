use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::trace;

use crate::series::{MetricSeries, Sample, SeriesSnapshot};

/// Default per-dimension history: 60 samples (1 min at 1 s).
pub const DEFAULT_MAX_HISTORY: usize = 60;

/// Default minimum spacing between accepted updates.
pub const DEFAULT_THROTTLE: Duration = Duration::from_secs(1);

/// What happened to a sample handed to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Appended to the series.
    Accepted,
    /// Dropped: arrived inside the throttle window.
    Throttled,
    /// Dropped: identical to the previous accepted sample for the key.
    Unchanged,
}

/// Bounded metric history for sparklines and charts.
///
/// Each key gets one [`RingBuffer`](crate::RingBuffer) per dimension capped at
/// `max_history`. Updates closer together than `throttle` are dropped (the
/// first one in a window wins), and samples that repeat the previous one for
/// their key are dropped so charts don't re-render on unchanged telemetry.
///
/// Keys are created on first accepted sample and never evicted. All methods
/// are synchronous.
#[derive(Debug, Clone)]
pub struct MetricHistoryStore {
    series: HashMap<String, MetricSeries>,
    max_history: usize,
    throttle: Duration,
    last_accepted: Option<Instant>,
}

impl MetricHistoryStore {
    /// # Panics
    ///
    /// Panics if `max_history` is zero.
    pub fn new(max_history: usize, throttle: Duration) -> Self {
        assert!(max_history > 0, "max_history must be > 0");
        Self {
            series: HashMap::new(),
            max_history,
            throttle,
            last_accepted: None,
        }
    }

    pub fn max_history(&self) -> usize {
        self.max_history
    }

    pub fn throttle(&self) -> Duration {
        self.throttle
    }

    /// Ingests one tick's worth of samples.
    pub fn ingest<I, K>(&mut self, batch: I) -> Vec<(String, IngestOutcome)>
    where
        I: IntoIterator<Item = (K, Sample)>,
        K: Into<String>,
    {
        self.ingest_at(batch, Instant::now())
    }

    /// Ingests a batch observed at `now`.
    ///
    /// The throttle applies to the batch as a whole; dedup applies per key.
    pub fn ingest_at<I, K>(&mut self, batch: I, now: Instant) -> Vec<(String, IngestOutcome)>
    where
        I: IntoIterator<Item = (K, Sample)>,
        K: Into<String>,
    {
        let throttled = self
            .last_accepted
            .is_some_and(|t| now.saturating_duration_since(t) < self.throttle);

        if throttled {
            let keys: Vec<_> = batch
                .into_iter()
                .map(|(k, _)| (k.into(), IngestOutcome::Throttled))
                .collect();
            trace!(count = keys.len(), "throttled metric batch");
            return keys;
        }

        let mut outcomes = Vec::new();
        for (key, sample) in batch {
            let key = key.into();
            let outcome = self.apply(&key, sample);
            outcomes.push((key, outcome));
        }

        if outcomes.iter().any(|(_, o)| *o == IngestOutcome::Accepted) {
            self.last_accepted = Some(now);
        }
        outcomes
    }

    /// Ingests a single key.
    pub fn record(&mut self, key: impl Into<String>, sample: Sample) -> IngestOutcome {
        self.record_at(key, sample, Instant::now())
    }

    pub fn record_at(
        &mut self,
        key: impl Into<String>,
        sample: Sample,
        now: Instant,
    ) -> IngestOutcome {
        self.ingest_at([(key.into(), sample)], now)
            .pop()
            .map_or(IngestOutcome::Unchanged, |(_, o)| o)
    }

    /// Ingests a JSON snapshot shaped `{key: {dimension: number, ...}, ...}`.
    ///
    /// Non-numeric fields and top-level scalars (like `timestamp`) are
    /// skipped. Anything other than an object yields no samples.
    pub fn ingest_json(&mut self, data: &Value) -> Vec<(String, IngestOutcome)> {
        self.ingest_json_at(data, Instant::now())
    }

    pub fn ingest_json_at(&mut self, data: &Value, now: Instant) -> Vec<(String, IngestOutcome)> {
        self.ingest_at(samples_from_json(data), now)
    }

    /// Read-only copy of a key's history.
    pub fn series(&self, key: &str) -> Option<SeriesSnapshot> {
        self.series.get(key).map(MetricSeries::snapshot)
    }

    /// All tracked keys, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.series.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// When the last sample was accepted.
    pub fn last_accepted(&self) -> Option<Instant> {
        self.last_accepted
    }

    /// Whether nothing was accepted within `threshold`. A store that never
    /// accepted anything is not stale, just empty.
    pub fn is_stale(&self, threshold: Duration) -> bool {
        self.last_accepted.is_some_and(|t| t.elapsed() > threshold)
    }

    fn apply(&mut self, key: &str, sample: Sample) -> IngestOutcome {
        if sample.is_empty() {
            return IngestOutcome::Unchanged;
        }

        let capacity = self.max_history;
        let series = self
            .series
            .entry(key.to_owned())
            .or_insert_with(|| MetricSeries::new(capacity));

        if series.is_repeat(&sample) {
            trace!(key, "unchanged sample dropped");
            return IngestOutcome::Unchanged;
        }

        series.push(sample);
        IngestOutcome::Accepted
    }
}

impl Default for MetricHistoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY, DEFAULT_THROTTLE)
    }
}

fn samples_from_json(data: &Value) -> Vec<(String, Sample)> {
    let Value::Object(top) = data else {
        return Vec::new();
    };

    top.iter()
        .filter_map(|(key, value)| {
            let Value::Object(fields) = value else {
                return None;
            };
            let sample: Sample = fields
                .iter()
                .filter_map(|(dim, v)| v.as_f64().map(|n| (dim.as_str(), n)))
                .collect();
            (!sample.is_empty()).then(|| (key.clone(), sample))
        })
        .collect()
}
