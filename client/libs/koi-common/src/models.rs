//! Notification models shared by the realtime and REST layers
//!
//! Wire names follow the backend's camelCase JSON. Push payloads and REST
//! pages use slightly different field names for the same data, which the
//! serde aliases below absorb.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// NOTIFICATION
// ============================================================================

/// Notification category
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum NotificationType {
    #[serde(alias = "registration", alias = "REGISTRATION")]
    Registration,
    #[serde(alias = "system", alias = "SYSTEM")]
    System,
    #[serde(alias = "show", alias = "SHOW")]
    Show,
    #[serde(alias = "payment", alias = "PAYMENT")]
    Payment,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::Registration => "Registration",
            NotificationType::System => "System",
            NotificationType::Show => "Show",
            NotificationType::Payment => "Payment",
        }
    }
}

/// A notification as shown in the notification list
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,

    #[serde(default)]
    pub title: String,

    /// Body text (`content` in push payloads)
    #[serde(default, alias = "content")]
    pub message: String,

    #[serde(rename = "type", alias = "notificationType")]
    pub notification_type: NotificationType,

    #[serde(default)]
    pub is_read: bool,

    /// Server emission time (`timestamp` in push payloads)
    #[serde(alias = "timestamp")]
    pub sent_date: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        id: impl Into<String>,
        notification_type: NotificationType,
        title: impl Into<String>,
        message: impl Into<String>,
        sent_date: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            message: message.into(),
            notification_type,
            is_read: false,
            sent_date,
        }
    }

    pub fn read(mut self) -> Self {
        self.is_read = true;
        self
    }
}

// ============================================================================
// FILTERS AND PAGES
// ============================================================================

/// Active filter of a notification list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotificationFilter {
    #[default]
    All,
    Unread,
    Read,
    Type(NotificationType),
}

impl NotificationFilter {
    /// Read state every item under this filter shares, if any
    pub fn read_state(&self) -> Option<bool> {
        match self {
            NotificationFilter::Unread => Some(false),
            NotificationFilter::Read => Some(true),
            NotificationFilter::All | NotificationFilter::Type(_) => None,
        }
    }

    pub fn matches(&self, notification: &Notification) -> bool {
        match self {
            NotificationFilter::All => true,
            NotificationFilter::Unread => !notification.is_read,
            NotificationFilter::Read => notification.is_read,
            NotificationFilter::Type(t) => notification.notification_type == *t,
        }
    }

    /// Query parameters understood by the notifications endpoint
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        match self {
            NotificationFilter::All => Vec::new(),
            NotificationFilter::Unread => vec![("isRead", "false".to_string())],
            NotificationFilter::Read => vec![("isRead", "true".to_string())],
            NotificationFilter::Type(t) => vec![("type", t.as_str().to_string())],
        }
    }
}

/// One page of notifications from the REST API
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPage {
    pub items: Vec<Notification>,
    #[serde(default, alias = "page")]
    pub page_number: u32,
    #[serde(default)]
    pub page_size: u32,
    #[serde(default)]
    pub total_items: u64,
    #[serde(default)]
    pub total_pages: u32,
}

impl NotificationPage {
    /// Whether another page can be requested after this one
    pub fn has_more(&self) -> bool {
        if self.total_pages > 0 {
            self.page_number < self.total_pages
        } else {
            self.page_size > 0 && self.items.len() as u32 >= self.page_size
        }
    }
}
