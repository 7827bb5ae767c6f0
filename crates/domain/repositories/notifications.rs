use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;
use uuid::Uuid;

/// Delivers a plain message to a user. Delivery is best effort.
#[automock]
#[async_trait]
pub trait NotificationSink {
    async fn notify(&self, recipient: Uuid, message: String) -> Result<()>;
}
