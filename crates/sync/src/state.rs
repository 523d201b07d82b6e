//! Published state of a feed.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use telesync_transport::ConnectionStatus;

/// Which update path produced the current value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    Poll,
    Stream,
}

/// Which update path is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncMode {
    /// Torn down. Nothing is written any more.
    Idle,
    /// Pulling at a fixed interval.
    Polling,
    /// Following the transport stream; the poll timer is suspended.
    Streaming,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncMode::Idle => "idle",
            SyncMode::Polling => "polling",
            SyncMode::Streaming => "streaming",
        };
        f.write_str(s)
    }
}

/// Why the latest pull did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    #[error("pull failed: {0}")]
    Pull(String),

    #[error("pull timed out after {0:?}")]
    Timeout(Duration),
}

/// Current view of one feed.
///
/// A failed pull sets `error` but leaves `value` alone, so consumers keep
/// showing the last good data next to the error.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncState<T> {
    pub value: Option<T>,
    /// True until the first value or error arrives.
    pub is_loading: bool,
    pub error: Option<FeedError>,
    pub source: Source,
    pub stream_status: ConnectionStatus,
    /// When `value` last changed.
    pub updated_at: Option<DateTime<Utc>>,
}

impl<T> Default for SyncState<T> {
    fn default() -> Self {
        Self {
            value: None,
            is_loading: true,
            error: None,
            source: Source::Poll,
            stream_status: ConnectionStatus::Disconnected,
            updated_at: None,
        }
    }
}

impl<T: PartialEq> SyncState<T> {
    /// Stores a fresh value and clears any error. Returns whether anything
    /// visible changed.
    pub(crate) fn apply_value(&mut self, value: T, source: Source, now: DateTime<Utc>) -> bool {
        let value_changed = self.value.as_ref() != Some(&value);
        let changed =
            value_changed || self.error.is_some() || self.is_loading || self.source != source;

        if value_changed {
            self.value = Some(value);
            self.updated_at = Some(now);
        }
        self.error = None;
        self.is_loading = false;
        self.source = source;
        changed
    }

    /// Records a failed pull, keeping the value.
    pub(crate) fn apply_error(&mut self, error: FeedError) -> bool {
        let changed = self.is_loading || self.error.as_ref() != Some(&error);
        self.error = Some(error);
        self.is_loading = false;
        changed
    }

    pub(crate) fn apply_status(&mut self, status: ConnectionStatus) -> bool {
        let changed = self.stream_status != status;
        self.stream_status = status;
        changed
    }

    /// Age of the value, or `None` before the first one.
    pub fn age(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.updated_at.map(|t| now - t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn starts_loading() {
        let state = SyncState::<u32>::default();
        assert!(state.is_loading);
        assert!(state.value.is_none());
        assert!(state.error.is_none());
        assert_eq!(state.stream_status, ConnectionStatus::Disconnected);
    }

    #[test]
    fn error_keeps_value() {
        let mut state = SyncState::default();
        assert!(state.apply_value(7u32, Source::Poll, now()));
        assert!(state.apply_error(FeedError::Pull("boom".into())));

        assert_eq!(state.value, Some(7));
        assert_eq!(state.error, Some(FeedError::Pull("boom".into())));
        assert!(!state.is_loading);
    }

    #[test]
    fn error_before_value_settles_loading() {
        let mut state = SyncState::<u32>::default();
        assert!(state.apply_error(FeedError::Timeout(Duration::from_secs(3))));
        assert!(!state.is_loading);
        assert!(state.value.is_none());

        // Same error again is not a change.
        assert!(!state.apply_error(FeedError::Timeout(Duration::from_secs(3))));
    }

    #[test]
    fn identical_value_is_not_a_change() {
        let mut state = SyncState::default();
        let t0 = now();
        assert!(state.apply_value(1u32, Source::Poll, t0));
        assert!(!state.apply_value(1, Source::Poll, t0 + chrono::Duration::seconds(5)));
        assert_eq!(state.updated_at, Some(t0));

        // Switching source is a change, even with the same value.
        assert!(state.apply_value(1, Source::Stream, t0));
        assert_eq!(state.source, Source::Stream);
    }

    #[test]
    fn value_clears_error() {
        let mut state = SyncState::default();
        state.apply_value(1u32, Source::Poll, now());
        state.apply_error(FeedError::Pull("x".into()));
        assert!(state.apply_value(1, Source::Poll, now()));
        assert!(state.error.is_none());
    }

    #[test]
    fn age_since_last_change() {
        let mut state = SyncState::default();
        assert_eq!(state.age(now()), None);
        state.apply_value(1u32, Source::Poll, now());
        assert_eq!(
            state.age(now() + chrono::Duration::seconds(4)),
            Some(chrono::Duration::seconds(4))
        );
    }

    #[test]
    fn status_changes() {
        let mut state = SyncState::<u32>::default();
        assert!(state.apply_status(ConnectionStatus::Connecting));
        assert!(!state.apply_status(ConnectionStatus::Connecting));
    }

    #[test]
    fn feed_error_display() {
        assert_eq!(
            FeedError::Pull("503 Service Unavailable".into()).to_string(),
            "pull failed: 503 Service Unavailable"
        );
        assert_eq!(
            FeedError::Timeout(Duration::from_secs(2)).to_string(),
            "pull timed out after 2s"
        );
    }
}
