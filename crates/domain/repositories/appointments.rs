use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;
use uuid::Uuid;

use crate::domain::entities::appointments::AppointmentEntity;

#[automock]
#[async_trait]
pub trait AppointmentDirectory {
    async fn find_appointment(&self, appointment_id: Uuid) -> Result<Option<AppointmentEntity>>;
}
