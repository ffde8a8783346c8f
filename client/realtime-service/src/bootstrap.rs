//! Chat and livestream bootstrap calls
//!
//! Fetches the tokens the chat and video SDKs need and makes sure the chat
//! channel of a show exists. Every call needs a signed-in user and fails fast
//! with `MissingCredential` otherwise.

use koi_common::{ApiClient, ClientError, Result, SessionStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatToken {
    pub token: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LivestreamToken {
    pub token: String,
    #[serde(default)]
    pub call_id: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatChannel {
    #[serde(alias = "channelId")]
    pub id: String,
    #[serde(default)]
    pub show_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateChannelRequest<'a> {
    show_id: &'a str,
    show_name: &'a str,
    user_id: &'a str,
}

pub struct RealtimeBootstrap {
    api: Arc<ApiClient>,
}

impl RealtimeBootstrap {
    pub fn new(api: Arc<ApiClient>) -> Self {
        Self { api }
    }

    fn require_user(&self) -> Result<String> {
        self.api.store().user_id().ok_or_else(|| {
            warn!("No user id in local storage, skipping realtime bootstrap");
            ClientError::MissingCredential("user_id")
        })
    }

    pub async fn chat_token(&self) -> Result<ChatToken> {
        let user_id = self.require_user()?;
        let token: ChatToken = self
            .api
            .get("/api/v1/chat/token", &[("userId", user_id.clone())])
            .await?;
        info!(%user_id, "Chat token issued");
        Ok(token)
    }

    pub async fn livestream_token(&self, livestream_id: &str) -> Result<LivestreamToken> {
        let user_id = self.require_user()?;
        let path = format!(
            "/api/v1/livestreams/{}/token",
            urlencoding::encode(livestream_id)
        );
        self.api.get(&path, &[("userId", user_id)]).await
    }

    /// Create the show's chat channel, or return the existing one
    pub async fn ensure_show_channel(&self, show_id: &str, show_name: &str) -> Result<ChatChannel> {
        let user_id = self.require_user()?;
        let channel: ChatChannel = self
            .api
            .post(
                "/api/v1/chat/channels",
                &CreateChannelRequest {
                    show_id,
                    show_name,
                    user_id: &user_id,
                },
            )
            .await?;
        info!(channel = %channel.id, %show_id, "Show chat channel ready");
        Ok(channel)
    }
}
