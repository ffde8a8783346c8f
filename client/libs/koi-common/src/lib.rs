//! Koi Common Library
//!
//! Shared types and utilities for the koi realtime client crates:
//! notification models, the client error taxonomy, device-local session
//! storage, configuration, toast delivery and the authenticated REST client.

pub mod config;
pub mod error;
pub mod http_client;
pub mod models;
pub mod storage;
pub mod toast;

pub use config::{ApiConfig, ClientConfig, FeedConfig, RealtimeConfig};
pub use error::{ClientError, Result};
pub use http_client::ApiClient;
pub use models::{Notification, NotificationFilter, NotificationPage, NotificationType};
pub use storage::{FileStore, LocalStore, MemoryStore, SessionStore};
pub use toast::{ChannelToastSink, LogToastSink, Toast, ToastKind, ToastSink};
