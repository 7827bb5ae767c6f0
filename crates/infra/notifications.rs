use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::info;
use url::Url;
use uuid::Uuid;

use crate::domain::repositories::notifications::NotificationSink;

/// Posts `{ "recipient", "message" }` to the notification service.
pub struct WebhookNotificationSink {
    webhook_url: Url,
    client: Client,
}

impl WebhookNotificationSink {
    pub fn new(webhook_url: Url) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(3)).build()?;

        Ok(Self {
            webhook_url,
            client,
        })
    }
}

#[async_trait]
impl NotificationSink for WebhookNotificationSink {
    async fn notify(&self, recipient: Uuid, message: String) -> Result<()> {
        let response = self
            .client
            .post(self.webhook_url.clone())
            .json(&json!({ "recipient": recipient, "message": message }))
            .send()
            .await
            .map_err(sanitize_reqwest_error)?;

        if response.status().is_success() {
            return Ok(());
        }

        Err(anyhow!(
            "notification webhook returned non-success status: {}",
            response.status()
        ))
    }
}

/// Writes the message to the log instead of delivering it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn notify(&self, recipient: Uuid, message: String) -> Result<()> {
        info!(%recipient, %message, "notifications: delivery skipped, no webhook configured");
        Ok(())
    }
}

/// Webhook sink when a URL is configured, log-only otherwise.
pub fn notification_sink(
    webhook_url: Option<&str>,
) -> Result<Arc<dyn NotificationSink + Send + Sync>> {
    match webhook_url {
        Some(url) => {
            let url = Url::parse(url).context("NOTIFICATION_WEBHOOK_URL is invalid")?;
            Ok(Arc::new(WebhookNotificationSink::new(url)?))
        }
        None => Ok(Arc::new(LogNotificationSink)),
    }
}

fn sanitize_reqwest_error(error: reqwest::Error) -> anyhow::Error {
    if error.is_timeout() {
        return anyhow!("notification webhook request timed out");
    }
    if error.is_connect() {
        return anyhow!("notification webhook connection failed");
    }
    anyhow!("notification webhook request failed")
}
