//! Domain events carried by the event socket

use koi_common::Toast;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const STATUS_CHANGED: &str = "statusChanged";
pub const LIVESTREAM_STARTED: &str = "livestreamStarted";
pub const PAYMENT_COMPLETED: &str = "paymentCompleted";
pub const RESULT_ANNOUNCED: &str = "resultAnnounced";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChanged {
    pub registration_id: String,
    pub status: String,
    #[serde(default)]
    pub koi_name: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LivestreamStarted {
    pub show_id: String,
    pub show_name: String,
    #[serde(default)]
    pub livestream_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentCompleted {
    pub payment_id: String,
    pub amount: f64,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultAnnounced {
    pub show_id: String,
    pub show_name: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    StatusChanged(StatusChanged),
    LivestreamStarted(LivestreamStarted),
    PaymentCompleted(PaymentCompleted),
    ResultAnnounced(ResultAnnounced),
    /// Any other event name, passed through untouched
    Other { name: String, payload: Value },
}

impl DomainEvent {
    pub fn from_event(name: &str, payload: Value) -> Result<Self, serde_json::Error> {
        Ok(match name {
            STATUS_CHANGED => DomainEvent::StatusChanged(serde_json::from_value(payload)?),
            LIVESTREAM_STARTED => DomainEvent::LivestreamStarted(serde_json::from_value(payload)?),
            PAYMENT_COMPLETED => DomainEvent::PaymentCompleted(serde_json::from_value(payload)?),
            RESULT_ANNOUNCED => DomainEvent::ResultAnnounced(serde_json::from_value(payload)?),
            _ => DomainEvent::Other {
                name: name.to_string(),
                payload,
            },
        })
    }

    pub fn name(&self) -> &str {
        match self {
            DomainEvent::StatusChanged(_) => STATUS_CHANGED,
            DomainEvent::LivestreamStarted(_) => LIVESTREAM_STARTED,
            DomainEvent::PaymentCompleted(_) => PAYMENT_COMPLETED,
            DomainEvent::ResultAnnounced(_) => RESULT_ANNOUNCED,
            DomainEvent::Other { name, .. } => name,
        }
    }

    /// Toast shown for this event, if any
    pub fn toast(&self) -> Option<Toast> {
        match self {
            DomainEvent::StatusChanged(e) => {
                let body = e.message.clone().unwrap_or_else(|| match &e.koi_name {
                    Some(koi) => format!("{} is now {}", koi, e.status),
                    None => format!("Your registration is now {}", e.status),
                });
                Some(Toast::info("Registration updated", body))
            }
            DomainEvent::LivestreamStarted(e) => Some(Toast::info(
                format!("{} is live", e.show_name),
                "The livestream has started. Tap to watch.",
            )),
            DomainEvent::PaymentCompleted(e) => {
                let body = e
                    .description
                    .clone()
                    .unwrap_or_else(|| format!("Payment of {} received", format_amount(e.amount)));
                Some(Toast::success("Payment completed", body))
            }
            DomainEvent::ResultAnnounced(e) => {
                let body = e
                    .message
                    .clone()
                    .unwrap_or_else(|| format!("Results for {} are now available", e.show_name));
                Some(Toast::info("Results announced", body))
            }
            DomainEvent::Other { .. } => None,
        }
    }
}

fn format_amount(amount: f64) -> String {
    if amount.fract() == 0.0 {
        format!("{:.0}", amount)
    } else {
        format!("{:.2}", amount)
    }
}
