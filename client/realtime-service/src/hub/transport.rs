//! Transport seam between the connection manager and a hub connection
//!
//! The manager never talks to a socket directly: it asks a
//! [`TransportFactory`] for a [`HubTransport`] and consumes the
//! [`TransportEvent`]s the transport pushes into an unbounded channel.

use async_trait::async_trait;
use koi_common::Result;
use resilience::RetryConfig;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Lifecycle of a single transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Events a transport reports to its owner
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Server invoked a client method
    Message { target: String, arguments: Vec<Value> },
    /// Connection dropped; automatic reconnect attempt `attempt` starts after `delay`
    Reconnecting { attempt: u32, delay: Duration },
    /// Automatic reconnect succeeded
    Reconnected,
    /// Connection is gone for good (automatic reconnect exhausted or not allowed)
    Closed { error: Option<String> },
}

/// Produces the bearer token at connect time
pub type TokenFactory = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// Everything a transport needs to open a hub connection
#[derive(Clone)]
pub struct HubOptions {
    pub url: String,
    pub access_token: TokenFactory,
    /// Automatic reconnect policy; `None` disables it
    pub reconnect: Option<RetryConfig>,
    pub handshake_timeout: Duration,
    pub keep_alive_interval: Duration,
    pub invocation_timeout: Duration,
}

impl HubOptions {
    pub fn new(url: impl Into<String>, access_token: TokenFactory) -> Self {
        Self {
            url: url.into(),
            access_token,
            reconnect: Some(RetryConfig::default()),
            handshake_timeout: Duration::from_secs(15),
            keep_alive_interval: Duration::from_secs(15),
            invocation_timeout: Duration::from_secs(30),
        }
    }
}

impl fmt::Debug for HubOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubOptions")
            .field("url", &self.url)
            .field("reconnect", &self.reconnect)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("keep_alive_interval", &self.keep_alive_interval)
            .field("invocation_timeout", &self.invocation_timeout)
            .finish_non_exhaustive()
    }
}

/// A hub connection
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HubTransport: Send + Sync {
    /// Connect and complete the handshake
    async fn start(&self) -> Result<()>;

    /// Close the connection. No `Closed` event is emitted for an explicit stop.
    async fn stop(&self);

    /// Invoke a server method and wait for its completion
    async fn invoke(&self, method: &str, arguments: Vec<Value>) -> Result<Value>;

    fn state(&self) -> TransportState;
}

/// Builds transports for the connection manager
pub trait TransportFactory: Send + Sync {
    fn create(
        &self,
        options: HubOptions,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Arc<dyn HubTransport>;
}
