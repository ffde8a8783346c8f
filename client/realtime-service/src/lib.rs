//! Realtime layer of the koi client
//!
//! - [`connection::ConnectionManager`]: the notification hub connection, with
//!   automatic and fallback reconnection
//! - [`group::GroupJoinProbe`]: per-user group membership after each connect
//! - [`dispatcher::NotificationDispatcher`]: fan-out of pushed notifications
//! - [`socket::EventSocket`]: Socket.IO domain events
//! - [`bootstrap::RealtimeBootstrap`]: chat and livestream tokens

pub mod bootstrap;
pub mod connection;
pub mod dispatcher;
pub mod group;
pub mod hub;
pub mod socket;

pub use bootstrap::{ChatChannel, ChatToken, LivestreamToken, RealtimeBootstrap};
pub use connection::{ConnectionManager, ConnectionState, HubSettings};
pub use dispatcher::{HubEvents, NotificationDispatcher, Subscription};
pub use group::{GroupJoinOutcome, GroupJoinProbe};
pub use hub::{WebSocketTransportFactory, TransportFactory};
pub use socket::{DomainEvent, EventSocket, EventSocketOptions};
