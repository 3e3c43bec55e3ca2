//! Transport layer between the chat client and its backend.
//!
//! Provides:
//! - Wire protocol (JSON events)
//! - `Connector` seam and `TransportSession` with reconnect/backoff
//! - In-memory connector for tests and embedding
//! - WebSocket connector (feature: websocket)

pub mod connector;
pub mod memory;
pub mod protocol;
pub mod session;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use connector::{Connection, Connector, TransportError};
pub use memory::{MemoryConnector, MemoryPeer, MemoryServer};
pub use protocol::{ClientEvent, ServerEvent};
pub use session::{TransportEvent, TransportSession, TransportSnapshot, TransportState};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnector;
