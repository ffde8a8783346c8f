//! Socket.IO event socket for coarse domain events

pub mod client;
pub mod events;
pub mod packet;

pub use client::{EventSocket, EventSocketOptions};
pub use events::DomainEvent;
pub use packet::{EnginePacket, PacketError, SocketPacket};
