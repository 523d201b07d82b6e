//! Streaming transport session for the telemetry stream.
//!
//! Owns one logical connection at a time: connects, forwards inbound frames
//! as [`TransportEvent`]s, accepts outbound sends while connected, and
//! reconnects on unexpected drops according to a [`ReconnectPolicy`].

pub mod error;
pub mod link;
pub mod memory;
mod pumps;
pub mod reconnection;
pub mod session;
pub mod types;
pub mod ws_client;

pub use error::TransportError;
pub use link::{Connector, Link, LinkEvent};
pub use memory::{MemoryConnector, MemoryListener, MemoryPeer};
pub use reconnection::ReconnectPolicy;
pub use session::TransportSession;
pub use types::{ConnectionStatus, TransportConfig, TransportEvent};
pub use ws_client::WsConnector;
