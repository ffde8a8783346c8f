use koi_common::{
    ApiClient, ClientConfig, FileStore, LocalStore, LogToastSink, NotificationFilter, ToastSink,
};
use koi_notifications::{NotificationFeed, RestNotificationsApi};
use koi_realtime::{
    ConnectionManager, EventSocket, EventSocketOptions, HubSettings, NotificationDispatcher,
    WebSocketTransportFactory,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = ClientConfig::from_env()?;
    tracing::info!(
        api = %config.api.base_url,
        hub = %config.realtime.hub_url,
        "Starting koi notification client"
    );

    let store: Arc<dyn LocalStore> = Arc::new(FileStore::new(&config.store_path));
    let toasts: Arc<dyn ToastSink> = Arc::new(LogToastSink);
    let api = Arc::new(ApiClient::new(&config.api, store.clone(), toasts.clone()));

    let dispatcher = NotificationDispatcher::new(toasts.clone());
    dispatcher.set_show_toast(config.toasts_enabled);
    dispatcher.set_on_toast_press(|notification| {
        tracing::info!(id = %notification.id, "Opening notification");
    });

    let manager = ConnectionManager::new(
        HubSettings::from_config(&config.realtime),
        store.clone(),
        Arc::new(WebSocketTransportFactory),
        dispatcher.clone(),
    );

    {
        let manager = manager.clone();
        api.set_on_unauthorized(move || {
            let manager = manager.clone();
            tokio::spawn(async move { manager.stop_connection().await });
        });
    }

    let socket = EventSocket::new(
        EventSocketOptions::from_config(&config.realtime, store.clone()),
        toasts.clone(),
    );
    socket.set_show_toasts(config.toasts_enabled);

    let feed = NotificationFeed::new(
        Arc::new(RestNotificationsApi::new(api.clone())),
        config.feed.clone(),
    );

    manager.setup_connection().await?;

    if let Err(e) = socket.connect().await {
        tracing::warn!(error = %e, "Event socket unavailable, continuing without domain events");
    }

    match feed.fetch(NotificationFilter::All).await {
        Ok(()) => tracing::info!(
            count = feed.items().len(),
            unread = feed.unread_count(),
            "Notification list loaded"
        ),
        Err(e) => tracing::warn!(error = %e, "Failed to load notifications"),
    }
    feed.attach_to(&dispatcher);

    let mut states = manager.watch_state();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            tracing::info!(?state, "Hub connection state changed");
        }
    });

    let mut events = socket.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => tracing::info!(event = event.name(), "Domain event received"),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Domain event listener lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    feed.close();
    socket.disconnect().await;
    manager.stop_connection().await;

    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());

    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
