//! Synchronization coordinator for dashboard feeds.
//!
//! A feed keeps one [`SyncState`] current. While its transport session is
//! connected the value follows the stream; otherwise a fixed-interval pull
//! takes over, starting with an immediate pull the moment the stream drops.

pub mod config;
pub mod coordinator;
pub mod source;
pub mod state;

pub use config::{ConfigError, SyncConfig};
pub use coordinator::{FeedConfig, Subscription};
pub use source::FeedSource;
pub use state::{FeedError, Source, SyncMode, SyncState};
