/// Toast delivery
///
/// The realtime and REST layers never render anything themselves. They hand a
/// `Toast` to a `ToastSink`, which the UI layer implements (or drains through
/// `ChannelToastSink`).
use tokio::sync::mpsc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastKind {
    Success,
    Error,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub kind: ToastKind,
    pub title: String,
    pub body: String,
    /// Notification the toast was raised for, used to route presses
    pub notification_id: Option<String>,
}

impl Toast {
    pub fn success(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(ToastKind::Success, title, body)
    }

    pub fn error(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(ToastKind::Error, title, body)
    }

    pub fn info(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(ToastKind::Info, title, body)
    }

    fn new(kind: ToastKind, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            body: body.into(),
            notification_id: None,
        }
    }

    pub fn for_notification(mut self, id: impl Into<String>) -> Self {
        self.notification_id = Some(id.into());
        self
    }
}

pub trait ToastSink: Send + Sync {
    fn show(&self, toast: Toast);
}

/// Writes toasts to the log. Default for headless runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogToastSink;

impl ToastSink for LogToastSink {
    fn show(&self, toast: Toast) {
        info!(kind = ?toast.kind, title = %toast.title, "{}", toast.body);
    }
}

/// Forwards toasts to a receiver owned by the UI layer
#[derive(Debug, Clone)]
pub struct ChannelToastSink {
    tx: mpsc::UnboundedSender<Toast>,
}

impl ChannelToastSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Toast>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ToastSink for ChannelToastSink {
    fn show(&self, toast: Toast) {
        // Receiver gone means the UI is shutting down
        let _ = self.tx.send(toast);
    }
}
