//! Fan-out of pushed notifications to local subscribers

use koi_common::{Notification, Toast, ToastSink};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Hub method names the server uses to push a notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubEvents {
    pub notification: Vec<String>,
}

impl Default for HubEvents {
    fn default() -> Self {
        Self {
            notification: vec![
                "ReceiveNotification".to_string(),
                "receiveNotification".to_string(),
            ],
        }
    }
}

impl HubEvents {
    pub fn is_notification(&self, target: &str) -> bool {
        self.notification.iter().any(|name| name == target)
    }
}

pub type NotificationCallback = Arc<dyn Fn(&Notification) + Send + Sync>;
type PressHandler = Arc<dyn Fn(&Notification) + Send + Sync>;

/// Delivers every pushed notification to the registered callbacks and,
/// unless disabled, shows it as a toast.
#[derive(Clone)]
pub struct NotificationDispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    subscribers: RwLock<Vec<NotificationCallback>>,
    toasts: Arc<dyn ToastSink>,
    show_toast: AtomicBool,
    on_toast_press: RwLock<Option<PressHandler>>,
}

/// Registration handle returned by [`NotificationDispatcher::on_notification`]
#[must_use = "dropping a Subscription keeps the callback registered; call unsubscribe() to remove it"]
pub struct Subscription {
    dispatcher: Weak<DispatcherInner>,
    callback: NotificationCallback,
}

impl Subscription {
    /// Remove exactly the callback this handle was created for
    pub fn unsubscribe(self) {
        if let Some(inner) = self.dispatcher.upgrade() {
            inner
                .subscribers
                .write()
                .retain(|cb| !Arc::ptr_eq(cb, &self.callback));
        }
    }
}

impl NotificationDispatcher {
    pub fn new(toasts: Arc<dyn ToastSink>) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                subscribers: RwLock::new(Vec::new()),
                toasts,
                show_toast: AtomicBool::new(true),
                on_toast_press: RwLock::new(None),
            }),
        }
    }

    pub fn on_notification<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        let callback: NotificationCallback = Arc::new(callback);
        self.inner.subscribers.write().push(callback.clone());
        Subscription {
            dispatcher: Arc::downgrade(&self.inner),
            callback,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }

    /// Call every subscriber in registration order, then show the toast
    pub fn emit(&self, notification: &Notification) {
        // Snapshot so callbacks may (un)subscribe without deadlocking.
        let subscribers = self.inner.subscribers.read().clone();
        for callback in subscribers {
            callback(notification);
        }

        if self.inner.show_toast.load(Ordering::SeqCst) {
            let title = if notification.title.trim().is_empty() {
                "New notification".to_string()
            } else {
                notification.title.clone()
            };
            self.inner
                .toasts
                .show(Toast::info(title, notification.message.clone()).for_notification(&notification.id));
        }
    }

    pub fn set_show_toast(&self, enabled: bool) {
        self.inner.show_toast.store(enabled, Ordering::SeqCst);
    }

    pub fn show_toast(&self) -> bool {
        self.inner.show_toast.load(Ordering::SeqCst)
    }

    pub fn set_on_toast_press<F>(&self, handler: F)
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        *self.inner.on_toast_press.write() = Some(Arc::new(handler));
    }

    /// Route a toast tap to the press handler
    pub fn press_toast(&self, notification: &Notification) {
        let handler = self.inner.on_toast_press.read().clone();
        match handler {
            Some(handler) => handler(notification),
            None => debug!(id = %notification.id, "Toast pressed with no handler installed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use koi_common::{ChannelToastSink, NotificationType};
    use parking_lot::Mutex;

    fn sample(id: &str) -> Notification {
        Notification::new(id, NotificationType::Show, "Show opened", "Voting is open", Utc::now())
    }

    #[test]
    fn test_emit_calls_subscribers_in_order() {
        let (sink, _rx) = ChannelToastSink::channel();
        let dispatcher = NotificationDispatcher::new(Arc::new(sink));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = seen.clone();
        let _a = dispatcher.on_notification(move |n| first.lock().push(format!("a:{}", n.id)));
        let second = seen.clone();
        let _b = dispatcher.on_notification(move |n| second.lock().push(format!("b:{}", n.id)));

        dispatcher.emit(&sample("n1"));
        assert_eq!(*seen.lock(), vec!["a:n1".to_string(), "b:n1".to_string()]);
    }

    #[test]
    fn test_unsubscribe_removes_only_that_callback() {
        let (sink, _rx) = ChannelToastSink::channel();
        let dispatcher = NotificationDispatcher::new(Arc::new(sink));
        let hits = Arc::new(Mutex::new(Vec::new()));

        let a = hits.clone();
        let sub_a = dispatcher.on_notification(move |_| a.lock().push("a"));
        let b = hits.clone();
        let _sub_b = dispatcher.on_notification(move |_| b.lock().push("b"));

        sub_a.unsubscribe();
        assert_eq!(dispatcher.subscriber_count(), 1);

        dispatcher.emit(&sample("n1"));
        assert_eq!(*hits.lock(), vec!["b"]);
    }

    #[test]
    fn test_toast_can_be_disabled() {
        let (sink, mut rx) = ChannelToastSink::channel();
        let dispatcher = NotificationDispatcher::new(Arc::new(sink));

        dispatcher.emit(&sample("n1"));
        let toast = rx.try_recv().unwrap();
        assert_eq!(toast.title, "Show opened");
        assert_eq!(toast.notification_id.as_deref(), Some("n1"));

        dispatcher.set_show_toast(false);
        dispatcher.emit(&sample("n2"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_press_toast_routes_to_handler() {
        let (sink, _rx) = ChannelToastSink::channel();
        let dispatcher = NotificationDispatcher::new(Arc::new(sink));
        dispatcher.press_toast(&sample("ignored"));

        let pressed = Arc::new(Mutex::new(None));
        let slot = pressed.clone();
        dispatcher.set_on_toast_press(move |n| *slot.lock() = Some(n.id.clone()));

        dispatcher.press_toast(&sample("n7"));
        assert_eq!(pressed.lock().as_deref(), Some("n7"));
    }

    #[test]
    fn test_default_hub_events() {
        let events = HubEvents::default();
        assert!(events.is_notification("ReceiveNotification"));
        assert!(events.is_notification("receiveNotification"));
        assert!(!events.is_notification("ReceiveMessage"));
    }
}
