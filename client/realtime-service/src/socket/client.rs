//! Event socket client
//!
//! Connects over the Engine.IO WebSocket transport, joins the default
//! namespace with `{"token": ...}`, answers server pings, and republishes
//! decoded [`DomainEvent`]s on a broadcast channel. A dropped link is retried
//! with the shared backoff formula; a server-side disconnect is final.

use futures_util::{SinkExt, StreamExt};
use koi_common::{ClientError, LocalStore, RealtimeConfig, Result, SessionStore, ToastSink};
use parking_lot::Mutex;
use resilience::timeout::{with_timeout_result, TimeoutError};
use resilience::{with_backoff, RetryConfig};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use super::events::DomainEvent;
use super::packet::{EnginePacket, OpenPayload, SocketPacket};
use crate::hub::TokenFactory;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct EventSocketOptions {
    pub url: String,
    pub access_token: TokenFactory,
    pub reconnect: Option<RetryConfig>,
    /// Bound on connect + Engine.IO open + namespace join
    pub connect_timeout: Duration,
}

impl EventSocketOptions {
    pub fn new(url: impl Into<String>, access_token: TokenFactory) -> Self {
        let preset = resilience::event_socket_config();
        Self {
            url: url.into(),
            access_token,
            reconnect: preset.retry,
            connect_timeout: preset.timeout.duration,
        }
    }

    /// Socket URL from config, token read from the store at connect time
    pub fn from_config(config: &RealtimeConfig, store: Arc<dyn LocalStore>) -> Self {
        Self::new(config.socket_url.clone(), Arc::new(move || store.auth_token()))
    }
}

#[derive(Clone)]
pub struct EventSocket {
    inner: Arc<Inner>,
}

struct Inner {
    options: EventSocketOptions,
    toasts: Arc<dyn ToastSink>,
    show_toasts: AtomicBool,
    events: broadcast::Sender<DomainEvent>,
    connected: AtomicBool,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct Session {
    ws: WsStream,
    open: OpenPayload,
}

enum SessionEnd {
    /// Link lost; reconnecting is allowed
    Dropped(Option<String>),
    /// Server disconnected the client on purpose
    Disconnected,
}

impl EventSocket {
    pub fn new(options: EventSocketOptions, toasts: Arc<dyn ToastSink>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                options,
                toasts,
                show_toasts: AtomicBool::new(true),
                events,
                connected: AtomicBool::new(false),
                outbound: Mutex::new(None),
                task: Mutex::new(None),
            }),
        }
    }

    /// Connect unless already running. A missing token is logged and skipped.
    pub async fn connect(&self) -> Result<()> {
        if self.inner.is_running() {
            debug!("Event socket already running");
            return Ok(());
        }
        if (self.inner.options.access_token)().is_none() {
            warn!("No auth token in local storage, not connecting the event socket");
            return Ok(());
        }

        let session = open_session(&self.inner.options).await?;
        info!(sid = %session.open.sid, "Event socket connected");

        let (tx, rx) = mpsc::unbounded_channel();
        *self.inner.outbound.lock() = Some(tx);
        self.inner.connected.store(true, Ordering::SeqCst);

        let handle = tokio::spawn(supervise(self.inner.clone(), session, rx));
        if let Some(previous) = self.inner.task.lock().replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    pub async fn disconnect(&self) {
        if let Some(outbound) = self.inner.outbound.lock().take() {
            let _ = outbound.send(SocketPacket::Disconnect.to_engine_text());
        }
        // Let the session flush the disconnect packet before tearing it down
        tokio::task::yield_now().await;

        if let Some(task) = self.inner.task.lock().take() {
            task.abort();
        }
        self.inner.connected.store(false, Ordering::SeqCst);
        debug!("Event socket disconnected");
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.inner.events.subscribe()
    }

    pub fn set_show_toasts(&self, enabled: bool) {
        self.inner.show_toasts.store(enabled, Ordering::SeqCst);
    }

    /// Send an event to the server
    pub fn emit(&self, name: &str, payload: Value) -> Result<()> {
        let outbound = self
            .inner
            .outbound
            .lock()
            .clone()
            .ok_or(ClientError::NotConnected)?;
        let packet = SocketPacket::Event {
            name: name.to_string(),
            args: vec![payload],
        };
        outbound
            .send(packet.to_engine_text())
            .map_err(|_| ClientError::NotConnected)
    }
}

impl Inner {
    /// A finished supervisor (server disconnect, reconnect exhausted) does not count
    fn is_running(&self) -> bool {
        matches!(self.task.lock().as_ref(), Some(task) if !task.is_finished())
    }

    fn publish(&self, name: &str, payload: Value) {
        match DomainEvent::from_event(name, payload) {
            Ok(event) => {
                debug!(event = event.name(), "Domain event received");
                if self.show_toasts.load(Ordering::SeqCst) {
                    if let Some(toast) = event.toast() {
                        self.toasts.show(toast);
                    }
                }
                // No subscribers is fine
                let _ = self.events.send(event);
            }
            Err(e) => warn!(event = name, error = %e, "Dropping malformed domain event"),
        }
    }
}

fn socket_url(options: &EventSocketOptions) -> Result<String> {
    let mut url = Url::parse(&options.url)
        .map_err(|e| ClientError::Config(format!("invalid socket url {}: {}", options.url, e)))?;
    if url.path().is_empty() || url.path() == "/" {
        url.set_path("/socket.io/");
    }
    url.query_pairs_mut()
        .append_pair("EIO", "4")
        .append_pair("transport", "websocket");
    Ok(url.to_string())
}

async fn open_session(options: &EventSocketOptions) -> Result<Session> {
    let url = socket_url(options)?;
    let auth = match (options.access_token)() {
        Some(token) => json!({ "token": token }),
        None => return Err(ClientError::MissingCredential("auth_token")),
    };

    match with_timeout_result(options.connect_timeout, async {
        let (mut ws, _) = connect_async(url.as_str())
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let open = match next_engine_packet(&mut ws).await? {
            EnginePacket::Open(open) => open,
            other => {
                return Err(ClientError::Handshake(format!(
                    "expected open packet, got {:?}",
                    other
                )))
            }
        };

        ws.send(Message::Text(SocketPacket::Connect(Some(auth)).to_engine_text()))
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        loop {
            match next_engine_packet(&mut ws).await? {
                EnginePacket::Message(data) => match SocketPacket::decode(&data) {
                    Ok(SocketPacket::Connect(_)) => return Ok(Session { ws, open }),
                    Ok(SocketPacket::ConnectError(payload)) => {
                        return Err(ClientError::Handshake(SocketPacket::error_message(&payload)))
                    }
                    Ok(other) => debug!(?other, "Packet before namespace join"),
                    Err(e) => return Err(ClientError::Protocol(e.to_string())),
                },
                EnginePacket::Ping(data) => {
                    ws.send(Message::Text(EnginePacket::Pong(data).encode()))
                        .await
                        .map_err(|e| ClientError::Transport(e.to_string()))?;
                }
                EnginePacket::Close => {
                    return Err(ClientError::Handshake("closed during namespace join".into()))
                }
                _ => {}
            }
        }
    })
    .await
    {
        Ok(session) => Ok(session),
        Err(TimeoutError::Elapsed(duration)) => Err(ClientError::Timeout(duration)),
        Err(TimeoutError::OperationFailed(e)) => Err(e),
    }
}

async fn next_engine_packet(ws: &mut WsStream) -> Result<EnginePacket> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                return EnginePacket::decode(&text).map_err(|e| ClientError::Protocol(e.to_string()))
            }
            Some(Ok(Message::Close(_))) | None => {
                return Err(ClientError::Transport("event socket closed".into()))
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(ClientError::Transport(e.to_string())),
        }
    }
}

async fn run_session(
    inner: &Inner,
    session: Session,
    outbound: &mut mpsc::UnboundedReceiver<String>,
) -> SessionEnd {
    let Session { mut ws, open } = session;
    let liveness = open.liveness_window();

    loop {
        tokio::select! {
            frame = tokio::time::timeout(liveness, ws.next()) => {
                let text = match frame {
                    Err(_) => return SessionEnd::Dropped(Some("ping timeout".into())),
                    Ok(Some(Ok(Message::Text(text)))) => text,
                    Ok(Some(Ok(Message::Close(_)))) | Ok(None) => return SessionEnd::Dropped(None),
                    Ok(Some(Ok(_))) => continue,
                    Ok(Some(Err(e))) => return SessionEnd::Dropped(Some(e.to_string())),
                };

                match EnginePacket::decode(&text) {
                    Ok(EnginePacket::Ping(data)) => {
                        if let Err(e) = ws.send(Message::Text(EnginePacket::Pong(data).encode())).await {
                            return SessionEnd::Dropped(Some(e.to_string()));
                        }
                    }
                    Ok(EnginePacket::Message(data)) => match SocketPacket::decode(&data) {
                        Ok(SocketPacket::Event { name, args }) => {
                            let payload = args.into_iter().next().unwrap_or(Value::Null);
                            inner.publish(&name, payload);
                        }
                        Ok(SocketPacket::Disconnect) => return SessionEnd::Disconnected,
                        Ok(other) => debug!(?other, "Ignoring socket packet"),
                        Err(e) => warn!(error = %e, "Dropping malformed socket packet"),
                    },
                    Ok(EnginePacket::Close) => return SessionEnd::Dropped(None),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Dropping malformed engine packet"),
                }
            }
            message = outbound.recv() => match message {
                Some(text) => {
                    if let Err(e) = ws.send(Message::Text(text)).await {
                        return SessionEnd::Dropped(Some(e.to_string()));
                    }
                }
                None => {
                    let _ = ws.close(None).await;
                    return SessionEnd::Disconnected;
                }
            }
        }
    }
}

async fn supervise(
    inner: Arc<Inner>,
    session: Session,
    outbound: mpsc::UnboundedReceiver<String>,
) {
    run_sessions(&inner, session, outbound).await;
    inner.outbound.lock().take();
    inner.connected.store(false, Ordering::SeqCst);
}

async fn run_sessions(
    inner: &Inner,
    mut session: Session,
    mut outbound: mpsc::UnboundedReceiver<String>,
) {
    loop {
        let end = run_session(inner, session, &mut outbound).await;
        inner.connected.store(false, Ordering::SeqCst);

        let reason = match end {
            SessionEnd::Disconnected => {
                info!("Event socket disconnected");
                return;
            }
            SessionEnd::Dropped(reason) => reason,
        };

        let Some(retry) = inner.options.reconnect.clone() else {
            warn!(?reason, "Event socket lost, reconnect disabled");
            return;
        };

        warn!(?reason, "Event socket lost, reconnecting");
        let options = &inner.options;
        match with_backoff(
            &retry,
            move || open_session(options),
            |attempt, delay| debug!(attempt, ?delay, "Event socket reconnect scheduled"),
        )
        .await
        {
            Ok(next) => {
                info!(sid = %next.open.sid, "Event socket reconnected");
                inner.connected.store(true, Ordering::SeqCst);
                session = next;
            }
            Err(e) => {
                warn!(error = %e, "Event socket reconnect exhausted");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(url: &str) -> EventSocketOptions {
        EventSocketOptions::new(url, Arc::new(|| Some("t".to_string())))
    }

    #[test]
    fn test_socket_url_defaults_path() {
        assert_eq!(
            socket_url(&options("ws://localhost:5001")).unwrap(),
            "ws://localhost:5001/socket.io/?EIO=4&transport=websocket"
        );
    }

    #[test]
    fn test_socket_url_keeps_custom_path() {
        assert_eq!(
            socket_url(&options("wss://events.koishow.dev/rt/")).unwrap(),
            "wss://events.koishow.dev/rt/?EIO=4&transport=websocket"
        );
    }

    #[test]
    fn test_options_use_event_socket_preset() {
        let opts = options("ws://localhost:5001");
        assert_eq!(opts.connect_timeout, Duration::from_secs(20));
        assert_eq!(opts.reconnect.unwrap().max_backoff, Duration::from_secs(5));
    }

    #[test]
    fn test_emit_requires_connection() {
        let socket = EventSocket::new(options("ws://localhost:5001"), Arc::new(koi_common::LogToastSink));
        assert!(matches!(
            socket.emit("joinShow", json!({"showId": "s1"})),
            Err(ClientError::NotConnected)
        ));
        assert!(!socket.is_connected());
    }
}
