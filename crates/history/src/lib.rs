pub mod buffer;
pub mod series;
pub mod store;

pub use buffer::RingBuffer;
pub use series::{Sample, SeriesSnapshot};
pub use store::{IngestOutcome, MetricHistoryStore};
