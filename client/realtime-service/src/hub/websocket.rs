//! WebSocket hub transport (tokio-tungstenite)
//!
//! One supervisor task per started transport reads frames, resolves pending
//! invocations and forwards server invocations as [`TransportEvent`]s. A
//! writer task owns the sink and sends the keep-alive ping. When the socket
//! drops, the supervisor runs the automatic reconnect with
//! [`resilience::with_backoff`] before reporting a final close.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use koi_common::{ClientError, Result};
use parking_lot::{Mutex, RwLock};
use resilience::timeout::{with_timeout_result, TimeoutError};
use resilience::with_backoff;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use super::protocol::{self, HubMessage};
use super::transport::{
    HubOptions, HubTransport, TransportEvent, TransportFactory, TransportState,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingResult = std::result::Result<Value, String>;

/// Factory for [`WebSocketHubTransport`]
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketTransportFactory;

impl TransportFactory for WebSocketTransportFactory {
    fn create(
        &self,
        options: HubOptions,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Arc<dyn HubTransport> {
        Arc::new(WebSocketHubTransport::new(options, events))
    }
}

pub struct WebSocketHubTransport {
    inner: Arc<Inner>,
}

struct Inner {
    options: HubOptions,
    events: mpsc::UnboundedSender<TransportEvent>,
    state: RwLock<TransportState>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    pending: Mutex<HashMap<String, oneshot::Sender<PendingResult>>>,
    next_invocation_id: AtomicU64,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

/// An established connection that has not been read from yet
struct Session {
    reader: SplitStream<WsStream>,
    /// Records that arrived in the same frame as the handshake response
    backlog: Vec<HubMessage>,
}

/// Why a session ended
struct SessionEnd {
    error: Option<String>,
    allow_reconnect: bool,
}

impl SessionEnd {
    fn dropped(error: Option<String>) -> Self {
        Self {
            error,
            allow_reconnect: true,
        }
    }
}

impl WebSocketHubTransport {
    pub fn new(options: HubOptions, events: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self {
            inner: Arc::new(Inner {
                options,
                events,
                state: RwLock::new(TransportState::Disconnected),
                outbound: Mutex::new(None),
                pending: Mutex::new(HashMap::new()),
                next_invocation_id: AtomicU64::new(0),
                supervisor: Mutex::new(None),
                stopped: AtomicBool::new(false),
            }),
        }
    }
}

#[async_trait]
impl HubTransport for WebSocketHubTransport {
    async fn start(&self) -> Result<()> {
        if *self.inner.state.read() != TransportState::Disconnected {
            debug!("Hub transport already started");
            return Ok(());
        }

        self.inner.stopped.store(false, Ordering::SeqCst);
        self.inner.set_state(TransportState::Connecting);

        let session = match connect_session(self.inner.clone()).await {
            Ok(session) => session,
            Err(e) => {
                self.inner.set_state(TransportState::Disconnected);
                return Err(e);
            }
        };

        if self.inner.stopped.load(Ordering::SeqCst) {
            self.inner.outbound.lock().take();
            return Err(ClientError::Cancelled);
        }

        self.inner.set_state(TransportState::Connected);
        info!(url = %self.inner.options.url, "Hub connection established");

        let handle = tokio::spawn(supervise(self.inner.clone(), session));
        if let Some(previous) = self.inner.supervisor.lock().replace(handle) {
            previous.abort();
        }

        Ok(())
    }

    async fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);

        if let Some(handle) = self.inner.supervisor.lock().take() {
            handle.abort();
        }
        if let Some(outbound) = self.inner.outbound.lock().take() {
            let _ = outbound.send(Message::Close(None));
        }

        self.inner.fail_pending("connection stopped");
        self.inner.set_state(TransportState::Disconnected);
        debug!(url = %self.inner.options.url, "Hub connection stopped");
    }

    async fn invoke(&self, method: &str, arguments: Vec<Value>) -> Result<Value> {
        if *self.inner.state.read() != TransportState::Connected {
            return Err(ClientError::NotConnected);
        }
        let outbound = self
            .inner
            .outbound
            .lock()
            .clone()
            .ok_or(ClientError::NotConnected)?;

        let invocation_id = self
            .inner
            .next_invocation_id
            .fetch_add(1, Ordering::SeqCst)
            .to_string();
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().insert(invocation_id.clone(), tx);

        let record = HubMessage::invocation(Some(invocation_id.clone()), method, arguments).encode();
        if outbound.send(Message::Text(record)).is_err() {
            self.inner.pending.lock().remove(&invocation_id);
            return Err(ClientError::NotConnected);
        }

        match with_timeout_result(self.inner.options.invocation_timeout, async {
            rx.await.map_err(|_| "connection closed".to_string())
        })
        .await
        {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(ClientError::Invocation {
                method: method.to_string(),
                message,
            }),
            Err(TimeoutError::Elapsed(duration)) => {
                self.inner.pending.lock().remove(&invocation_id);
                Err(ClientError::Timeout(duration))
            }
            Err(TimeoutError::OperationFailed(message)) => Err(ClientError::Transport(message)),
        }
    }

    fn state(&self) -> TransportState {
        *self.inner.state.read()
    }
}

impl Drop for WebSocketHubTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.inner.supervisor.lock().take() {
            handle.abort();
        }
    }
}

impl Inner {
    fn set_state(&self, state: TransportState) {
        *self.state.write() = state;
    }

    fn emit(&self, event: TransportEvent) {
        if self.events.send(event).is_err() {
            debug!("Transport event receiver dropped");
        }
    }

    fn fail_pending(&self, reason: &str) {
        let pending: Vec<_> = self.pending.lock().drain().collect();
        for (_, tx) in pending {
            let _ = tx.send(Err(reason.to_string()));
        }
    }

    /// Report a final close
    fn close(&self, error: Option<String>) {
        self.outbound.lock().take();
        self.set_state(TransportState::Disconnected);
        self.emit(TransportEvent::Closed { error });
    }

    /// Apply one record; returns `Some` when the server closed the session
    fn handle(&self, message: HubMessage) -> Option<SessionEnd> {
        match message {
            HubMessage::Invocation {
                target, arguments, ..
            } => {
                self.emit(TransportEvent::Message { target, arguments });
            }
            HubMessage::Completion {
                invocation_id,
                result,
                error,
            } => {
                let waiter = self.pending.lock().remove(&invocation_id);
                match waiter {
                    Some(tx) => {
                        let outcome = match error {
                            Some(error) => Err(error),
                            None => Ok(result.unwrap_or(Value::Null)),
                        };
                        let _ = tx.send(outcome);
                    }
                    None => debug!(%invocation_id, "Completion for unknown invocation"),
                }
            }
            HubMessage::Ping => {}
            HubMessage::Close {
                error,
                allow_reconnect,
            } => {
                info!(?error, allow_reconnect, "Hub server closed the connection");
                return Some(SessionEnd {
                    error,
                    allow_reconnect,
                });
            }
            HubMessage::Other(kind) => debug!(kind, "Ignoring unsupported hub message"),
        }
        None
    }
}

/// Build the connect URL with the bearer token in `access_token`
fn connect_url(options: &HubOptions) -> Result<String> {
    let mut url = Url::parse(&options.url)
        .map_err(|e| ClientError::Config(format!("invalid hub url {}: {}", options.url, e)))?;
    if let Some(token) = (options.access_token)() {
        url.query_pairs_mut().append_pair("access_token", &token);
    }
    Ok(url.to_string())
}

/// Connect, handshake and start the writer task
async fn connect_session(inner: Arc<Inner>) -> Result<Session> {
    let url = connect_url(&inner.options)?;
    let handshake_timeout = inner.options.handshake_timeout;

    let (sink, reader, backlog) = match with_timeout_result(handshake_timeout, async {
        let (ws, _) = connect_async(url.as_str())
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        handshake(ws).await
    })
    .await
    {
        Ok(parts) => parts,
        Err(TimeoutError::Elapsed(_)) => {
            return Err(ClientError::Handshake(format!(
                "no handshake response within {:?}",
                handshake_timeout
            )))
        }
        Err(TimeoutError::OperationFailed(e)) => return Err(e),
    };

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(write_loop(sink, rx, inner.options.keep_alive_interval));
    *inner.outbound.lock() = Some(tx);

    Ok(Session { reader, backlog })
}

async fn handshake(
    ws: WsStream,
) -> Result<(SplitSink<WsStream, Message>, SplitStream<WsStream>, Vec<HubMessage>)> {
    let (mut sink, mut reader) = ws.split();

    sink.send(Message::Text(protocol::handshake_request()))
        .await
        .map_err(|e| ClientError::Transport(e.to_string()))?;

    loop {
        match reader.next().await {
            Some(Ok(Message::Text(text))) => {
                let backlog = protocol::parse_handshake_response(&text)
                    .map_err(|e| ClientError::Handshake(e.to_string()))?;
                return Ok((sink, reader, backlog));
            }
            Some(Ok(Message::Close(frame))) => {
                return Err(ClientError::Handshake(
                    frame
                        .map(|f| f.reason.to_string())
                        .unwrap_or_else(|| "closed during handshake".to_string()),
                ))
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(ClientError::Transport(e.to_string())),
            None => {
                return Err(ClientError::Handshake(
                    "connection ended during handshake".to_string(),
                ))
            }
        }
    }
}

async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
    keep_alive: Duration,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + keep_alive, keep_alive);

    loop {
        tokio::select! {
            message = rx.recv() => match message {
                Some(message) => {
                    let closing = matches!(message, Message::Close(_));
                    if let Err(e) = sink.send(message).await {
                        debug!(error = %e, "Hub write failed");
                        break;
                    }
                    if closing {
                        break;
                    }
                }
                None => break,
            },
            _ = ticker.tick() => {
                if sink.send(Message::Text(HubMessage::Ping.encode())).await.is_err() {
                    break;
                }
            }
        }
    }

    let _ = sink.close().await;
}

async fn run_session(inner: &Inner, session: Session) -> SessionEnd {
    let Session {
        mut reader,
        backlog,
    } = session;

    for message in backlog {
        if let Some(end) = inner.handle(message) {
            return end;
        }
    }

    'read: loop {
        match reader.next().await {
            Some(Ok(Message::Text(text))) => match protocol::decode_frame(&text) {
                Ok(messages) => {
                    for message in messages {
                        if let Some(end) = inner.handle(message) {
                            break 'read end;
                        }
                    }
                }
                Err(e) => warn!(error = %e, "Dropping malformed hub frame"),
            },
            Some(Ok(Message::Close(frame))) => {
                break SessionEnd::dropped(frame.map(|f| f.reason.to_string()))
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => break SessionEnd::dropped(Some(e.to_string())),
            None => break SessionEnd::dropped(None),
        }
    }
}

/// Drive sessions until the transport is stopped or gives up
async fn supervise(inner: Arc<Inner>, mut session: Session) {
    loop {
        let end = run_session(&inner, session).await;
        inner.outbound.lock().take();
        inner.fail_pending("connection lost");

        if inner.stopped.load(Ordering::SeqCst) {
            return;
        }

        let retry = match (&inner.options.reconnect, end.allow_reconnect) {
            (Some(retry), true) => retry.clone(),
            _ => {
                inner.close(end.error);
                return;
            }
        };

        warn!(error = ?end.error, "Hub connection lost, reconnecting");
        inner.set_state(TransportState::Reconnecting);

        let events = inner.events.clone();
        let reconnected = with_backoff(
            &retry,
            || connect_session(inner.clone()),
            |attempt, delay| {
                let _ = events.send(TransportEvent::Reconnecting { attempt, delay });
            },
        )
        .await;

        if inner.stopped.load(Ordering::SeqCst) {
            inner.outbound.lock().take();
            return;
        }

        match reconnected {
            Ok(next) => {
                info!("Hub connection re-established");
                inner.set_state(TransportState::Connected);
                inner.emit(TransportEvent::Reconnected);
                session = next;
            }
            Err(e) => {
                warn!(error = %e, "Hub automatic reconnect exhausted");
                let error = e
                    .into_last_error()
                    .map(|e| e.to_string())
                    .or(end.error);
                inner.close(error);
                return;
            }
        }
    }
}
