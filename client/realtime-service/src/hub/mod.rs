//! Notification hub client: wire protocol, transport seam and the WebSocket transport

pub mod protocol;
pub mod transport;
pub mod websocket;

pub use protocol::{HubMessage, ProtocolError};
pub use transport::{
    HubOptions, HubTransport, TokenFactory, TransportEvent, TransportFactory, TransportState,
};
pub use websocket::{WebSocketHubTransport, WebSocketTransportFactory};
