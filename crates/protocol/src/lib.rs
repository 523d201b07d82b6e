//! Wire protocol for the cluster telemetry stream.
//!
//! Every frame is a JSON text message shaped `{type, data, timestamp}`.

pub mod constants;
pub mod envelope;

pub use envelope::{InboundMessage, OutboundMessage, ProtocolError};
