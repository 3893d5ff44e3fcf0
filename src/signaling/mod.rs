//! Signaling channel to the realtime backend
//!
//! Typed JSON messages over a pluggable persistent transport:
//! - `websocket` - tokio-tungstenite client used in production
//! - `memory` - in-process peer for tests and simulations

pub mod channel;
pub mod memory;
pub mod messages;
pub mod transport;
pub mod websocket;

pub use channel::{SignalingChannel, SignalingSender};
pub use memory::{MemoryTransport, RemotePeer};
pub use messages::{ClientEvent, Role, ServerEvent};
pub use transport::{Connection, Transport};
pub use websocket::WebSocketTransport;
