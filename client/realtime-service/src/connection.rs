//! Notification hub connection manager
//!
//! Owns the one hub transport of the app. It is constructed in the
//! composition root and handed out by clone; every clone drives the same
//! connection.
//!
//! Reconnection happens on two layers sharing one backoff formula:
//! - the transport's own automatic reconnect, reported as
//!   `Reconnecting`/`Reconnected` events
//! - the manager's fallback timer, used when a start fails or the transport
//!   reports a final close. The handle is torn down and rebuilt.

use futures_util::future::BoxFuture;
use koi_common::{LocalStore, Notification, RealtimeConfig, Result, SessionStore};
use parking_lot::Mutex;
use resilience::{AttemptCounter, RetryConfig};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::dispatcher::{HubEvents, NotificationDispatcher};
use crate::group::{GroupJoinOutcome, GroupJoinProbe};
use crate::hub::{HubOptions, HubTransport, TransportEvent, TransportFactory, TransportState};

/// Observable state of the manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Fallback reconnect attempts exhausted
    GaveUp,
}

/// Hub settings for a [`ConnectionManager`]
#[derive(Debug, Clone)]
pub struct HubSettings {
    pub url: String,
    /// Used for both the transport's automatic reconnect and the fallback timer
    pub reconnect: RetryConfig,
    pub events: HubEvents,
    pub probe: GroupJoinProbe,
    pub handshake_timeout: Duration,
    pub keep_alive_interval: Duration,
    pub invocation_timeout: Duration,
}

impl HubSettings {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: RetryConfig::default(),
            events: HubEvents::default(),
            probe: GroupJoinProbe::default(),
            handshake_timeout: Duration::from_secs(15),
            keep_alive_interval: Duration::from_secs(15),
            invocation_timeout: Duration::from_secs(30),
        }
    }

    pub fn from_config(config: &RealtimeConfig) -> Self {
        Self {
            reconnect: config.reconnect.clone(),
            ..Self::new(config.hub_url.clone())
        }
    }
}

#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    settings: HubSettings,
    store: Arc<dyn LocalStore>,
    factory: Arc<dyn TransportFactory>,
    dispatcher: NotificationDispatcher,
    handle: Mutex<Option<Handle>>,
    /// Held for the duration of a setup so `ensure_connection` can wait on it
    setup_gate: tokio::sync::Mutex<()>,
    setup_in_flight: AtomicBool,
    generation: AtomicU64,
    attempts: AttemptCounter,
    reconnect_timer: Mutex<Option<(u64, JoinHandle<()>)>>,
    timer_seq: AtomicU64,
    state_tx: watch::Sender<ConnectionState>,
}

struct Handle {
    generation: u64,
    transport: Arc<dyn HubTransport>,
    pump: JoinHandle<()>,
}

impl ConnectionManager {
    pub fn new(
        settings: HubSettings,
        store: Arc<dyn LocalStore>,
        factory: Arc<dyn TransportFactory>,
        dispatcher: NotificationDispatcher,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                settings,
                store,
                factory,
                dispatcher,
                handle: Mutex::new(None),
                setup_gate: tokio::sync::Mutex::new(()),
                setup_in_flight: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                attempts: AttemptCounter::new(),
                reconnect_timer: Mutex::new(None),
                timer_seq: AtomicU64::new(0),
                state_tx,
            }),
        }
    }

    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.inner.dispatcher
    }

    /// Create and start the hub connection unless one exists or is being set up.
    ///
    /// A missing auth token or a failed start is logged, not returned; a
    /// failed start schedules the fallback reconnect.
    pub async fn setup_connection(&self) -> Result<()> {
        if self.inner.handle.lock().is_some() {
            debug!("Hub connection already exists");
            return Ok(());
        }
        if self.inner.setup_in_flight.swap(true, Ordering::SeqCst) {
            debug!("Hub connection setup already in flight");
            return Ok(());
        }

        let _gate = self.inner.setup_gate.lock().await;
        let result = if self.inner.handle.lock().is_some() {
            Ok(())
        } else {
            self.connect().await
        };
        self.inner.setup_in_flight.store(false, Ordering::SeqCst);
        result
    }

    /// Cancel any pending reconnect, stop the transport and drop the handle
    pub async fn stop_connection(&self) {
        self.cancel_reconnect_timer();

        let handle = self.inner.handle.lock().take();
        if let Some(handle) = handle {
            handle.pump.abort();
            handle.transport.stop().await;
            info!("Hub connection stopped");
        }

        self.set_state(ConnectionState::Disconnected);
    }

    pub fn is_connected(&self) -> bool {
        self.inner
            .handle
            .lock()
            .as_ref()
            .map(|h| h.transport.state() == TransportState::Connected)
            .unwrap_or(false)
    }

    /// Wait for an in-flight setup, then set up if still not connected
    pub async fn ensure_connection(&self) -> Result<()> {
        drop(self.inner.setup_gate.lock().await);

        if self.is_connected() {
            return Ok(());
        }
        self.setup_connection().await
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.attempts.current()
    }

    async fn connect(&self) -> Result<()> {
        if self.inner.store.auth_token().is_none() {
            warn!("No auth token in local storage, not connecting to the notification hub");
            self.set_state(ConnectionState::Disconnected);
            return Ok(());
        }

        self.set_state(ConnectionState::Connecting);

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let transport = self.inner.factory.create(self.hub_options(), events_tx);

        let pump = tokio::spawn(self.clone().pump_events(generation, transport.clone(), events_rx));
        *self.inner.handle.lock() = Some(Handle {
            generation,
            transport: transport.clone(),
            pump,
        });

        let started = transport.start().await;

        if !self.is_current(generation) {
            debug!("Hub connection stopped during setup");
            transport.stop().await;
            return Ok(());
        }

        match started {
            Ok(()) => {
                info!(url = %self.inner.settings.url, "Connected to notification hub");
                self.on_connected(transport.as_ref()).await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to start hub connection");
                if let Some(handle) = self.take_handle(generation) {
                    handle.pump.abort();
                }
                self.schedule_reconnect();
            }
        }

        Ok(())
    }

    fn hub_options(&self) -> HubOptions {
        let settings = &self.inner.settings;
        let store = self.inner.store.clone();
        HubOptions {
            url: settings.url.clone(),
            access_token: Arc::new(move || store.auth_token()),
            reconnect: Some(settings.reconnect.clone()),
            handshake_timeout: settings.handshake_timeout,
            keep_alive_interval: settings.keep_alive_interval,
            invocation_timeout: settings.invocation_timeout,
        }
    }

    async fn on_connected(&self, transport: &dyn HubTransport) {
        self.inner.attempts.reset();
        self.cancel_reconnect_timer();
        self.set_state(ConnectionState::Connected);

        let outcome = self
            .inner
            .settings
            .probe
            .join(transport, self.inner.store.as_ref())
            .await;
        if let GroupJoinOutcome::Joined { method } = outcome {
            debug!(%method, "Group membership established");
        }
    }

    async fn pump_events(
        self,
        generation: u64,
        transport: Arc<dyn HubTransport>,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        while let Some(event) = events.recv().await {
            if !self.is_current(generation) {
                break;
            }

            match event {
                TransportEvent::Message { target, arguments } => {
                    if self.inner.settings.events.is_notification(&target) {
                        self.dispatch(arguments);
                    } else {
                        debug!(%target, "Ignoring hub invocation");
                    }
                }
                TransportEvent::Reconnecting { attempt, delay } => {
                    info!(attempt, ?delay, "Hub connection lost, retrying");
                    self.set_state(ConnectionState::Reconnecting);
                }
                TransportEvent::Reconnected => {
                    info!("Hub connection restored");
                    self.on_connected(transport.as_ref()).await;
                }
                TransportEvent::Closed { error } => {
                    warn!(?error, "Hub connection closed");
                    if let Some(handle) = self.take_handle(generation) {
                        handle.transport.stop().await;
                    }
                    self.schedule_reconnect();
                    break;
                }
            }
        }
    }

    fn dispatch(&self, arguments: Vec<Value>) {
        let Some(payload) = arguments.into_iter().next() else {
            warn!("Notification push without payload");
            return;
        };

        match serde_json::from_value::<Notification>(payload) {
            Ok(notification) => {
                debug!(id = %notification.id, "Notification received");
                self.inner.dispatcher.emit(&notification);
            }
            Err(e) => warn!(error = %e, "Dropping undecodable notification push"),
        }
    }

    /// Schedule the fallback reconnect. Returns the delay, or `None` after giving up.
    fn schedule_reconnect(&self) -> Option<Duration> {
        let retry = &self.inner.settings.reconnect;
        let attempts = self.inner.attempts.current();

        if !retry.allows(attempts) {
            warn!(attempts, "Giving up on hub reconnection");
            self.cancel_reconnect_timer();
            self.set_state(ConnectionState::GaveUp);
            return None;
        }

        let delay = retry.delay_for(attempts);
        let attempt = self.inner.attempts.increment();
        self.set_state(ConnectionState::Reconnecting);
        info!(attempt, max = retry.max_retries, ?delay, "Scheduling hub reconnect");

        let timer_id = self.inner.timer_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let manager = self.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            manager.release_timer(timer_id);
            if let Err(e) = manager.setup_boxed().await {
                warn!(error = %e, "Hub reconnect failed");
            }
        });

        if let Some((_, previous)) = self.inner.reconnect_timer.lock().replace((timer_id, timer)) {
            previous.abort();
        }

        Some(delay)
    }

    fn setup_boxed(&self) -> BoxFuture<'static, Result<()>> {
        let manager = self.clone();
        Box::pin(async move { manager.setup_connection().await })
    }

    /// Forget the timer slot if it still holds `timer_id` (the running timer itself)
    fn release_timer(&self, timer_id: u64) {
        let mut slot = self.inner.reconnect_timer.lock();
        if matches!(slot.as_ref(), Some((id, _)) if *id == timer_id) {
            slot.take();
        }
    }

    fn cancel_reconnect_timer(&self) {
        if let Some((_, timer)) = self.inner.reconnect_timer.lock().take() {
            timer.abort();
        }
    }

    fn has_pending_reconnect(&self) -> bool {
        self.inner.reconnect_timer.lock().is_some()
    }

    fn is_current(&self, generation: u64) -> bool {
        self.inner
            .handle
            .lock()
            .as_ref()
            .map(|h| h.generation == generation)
            .unwrap_or(false)
    }

    fn take_handle(&self, generation: u64) -> Option<Handle> {
        let mut slot = self.inner.handle.lock();
        if slot.as_ref().map(|h| h.generation) == Some(generation) {
            slot.take()
        } else {
            None
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.inner.state_tx.send_replace(state);
        if previous != state {
            debug!(?previous, current = ?state, "Connection state changed");
        }
    }
}
