//! Per-user group membership
//!
//! The server has shipped several names for its "join my group" method. After
//! each (re)connect the probe tries them in order and stops at the first one
//! the server accepts.

use koi_common::{LocalStore, SessionStore};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::hub::HubTransport;

pub const DEFAULT_GROUP_METHODS: [&str; 8] = [
    "AddToGroup",
    "addToGroup",
    "JoinGroup",
    "joinGroup",
    "Subscribe",
    "subscribe",
    "SubscribeToUser",
    "subscribeToUser",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupJoinOutcome {
    Joined { method: String },
    MissingUserId,
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupJoinProbe {
    candidates: Vec<String>,
}

impl Default for GroupJoinProbe {
    fn default() -> Self {
        Self::new(DEFAULT_GROUP_METHODS)
    }
}

impl GroupJoinProbe {
    pub fn new<I, S>(candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            candidates: candidates.into_iter().map(Into::into).collect(),
        }
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    /// Join the group of the stored user. Never fails; the outcome is informational.
    pub async fn join(&self, transport: &dyn HubTransport, store: &dyn LocalStore) -> GroupJoinOutcome {
        let Some(user_id) = store.user_id() else {
            warn!("No user id in local storage, skipping group join");
            return GroupJoinOutcome::MissingUserId;
        };

        for method in &self.candidates {
            match transport
                .invoke(method, vec![Value::String(user_id.clone())])
                .await
            {
                Ok(_) => {
                    info!(%method, %user_id, "Joined user notification group");
                    return GroupJoinOutcome::Joined {
                        method: method.clone(),
                    };
                }
                Err(e) => debug!(%method, error = %e, "Group join candidate rejected"),
            }
        }

        warn!(
            %user_id,
            tried = self.candidates.len(),
            "No group join method accepted, continuing without group membership"
        );
        GroupJoinOutcome::Exhausted
    }
}
