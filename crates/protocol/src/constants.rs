use std::time::Duration;

/// Largest text frame accepted from the stream (4 MB).
///
/// Anything bigger is treated as malformed and dropped before parsing.
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// How often the client pings an otherwise idle stream.
pub const KEEPALIVE_PERIOD: Duration = Duration::from_secs(15);

/// Read deadline for the stream.
///
/// Any incoming frame (data, ping or pong) resets it. When nothing arrives
/// within this window the link is considered dead and closed.
pub const READ_DEADLINE: Duration = Duration::from_secs(45);

/// Time allowed for the WebSocket handshake.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
