//! Notifications REST endpoints

use async_trait::async_trait;
use koi_common::{ApiClient, NotificationFilter, NotificationPage, Result};
use serde_json::{json, Value};
use std::sync::Arc;

/// Remote side of the notification list
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationsApi: Send + Sync {
    /// Fetch one page (1-based) under `filter`
    async fn fetch_page(
        &self,
        filter: NotificationFilter,
        page_number: u32,
        page_size: u32,
    ) -> Result<NotificationPage>;

    async fn mark_as_read(&self, id: &str) -> Result<()>;

    async fn mark_all_as_read(&self) -> Result<()>;

    async fn delete(&self, id: &str) -> Result<()>;
}

pub struct RestNotificationsApi {
    api: Arc<ApiClient>,
}

impl RestNotificationsApi {
    pub fn new(api: Arc<ApiClient>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl NotificationsApi for RestNotificationsApi {
    async fn fetch_page(
        &self,
        filter: NotificationFilter,
        page_number: u32,
        page_size: u32,
    ) -> Result<NotificationPage> {
        let mut query = vec![
            ("pageNumber", page_number.to_string()),
            ("pageSize", page_size.to_string()),
        ];
        query.extend(filter.query_pairs());
        self.api.get("/api/v1/notifications", &query).await
    }

    async fn mark_as_read(&self, id: &str) -> Result<()> {
        let path = format!("/api/v1/notifications/{}/read", urlencoding::encode(id));
        let _: Value = self.api.put(&path, &json!({})).await?;
        Ok(())
    }

    async fn mark_all_as_read(&self) -> Result<()> {
        let _: Value = self
            .api
            .put("/api/v1/notifications/read-all", &json!({}))
            .await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let path = format!("/api/v1/notifications/{}", urlencoding::encode(id));
        let _: Value = self.api.delete(&path).await?;
        Ok(())
    }
}
