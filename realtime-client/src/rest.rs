/// REST fallback collaborator
///
/// The notification-list page tries the real-time command first and falls
/// back to these endpoints when the push channel is unavailable. The two
/// paths are never reconciled beyond that best effort; whichever succeeds is
/// trusted.
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::models::Notification;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct NotificationPage {
    pub notifications: Vec<Notification>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
}

#[derive(Debug, Deserialize)]
struct UnreadCountResponse {
    unread_count: u32,
}

pub struct NotificationApi {
    http: reqwest::Client,
    base_url: String,
    token: RwLock<Option<String>>,
}

impl NotificationApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            token: RwLock::new(None),
        }
    }

    pub async fn set_token(&self, token: Option<String>) {
        *self.token.write().await = token;
    }

    pub async fn list(&self, page: u32, per_page: u32) -> Result<NotificationPage> {
        let request = self
            .http
            .get(format!("{}/api/v1/notifications", self.base_url))
            .query(&[("page", page), ("per_page", per_page)]);
        let response = self
            .authorize(request)
            .await
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    pub async fn mark_read(&self, notification_id: i64) -> Result<()> {
        let request = self.http.put(format!(
            "{}/api/v1/notifications/{notification_id}/read",
            self.base_url
        ));
        self.authorize(request).await.send().await?.error_for_status()?;
        Ok(())
    }

    pub async fn mark_all_read(&self) -> Result<()> {
        let request = self
            .http
            .put(format!("{}/api/v1/notifications/read-all", self.base_url));
        self.authorize(request).await.send().await?.error_for_status()?;
        Ok(())
    }

    pub async fn unread_count(&self) -> Result<u32> {
        let request = self
            .http
            .get(format!("{}/api/v1/notifications/unread-count", self.base_url));
        let response = self
            .authorize(request)
            .await
            .send()
            .await?
            .error_for_status()?;
        let body: UnreadCountResponse = response.json().await?;
        Ok(body.unread_count)
    }

    async fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.token.read().await.as_deref() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}
