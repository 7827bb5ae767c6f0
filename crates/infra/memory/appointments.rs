use anyhow::Result;
use async_trait::async_trait;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{
    entities::appointments::AppointmentEntity, repositories::appointments::AppointmentDirectory,
};

#[derive(Default, Clone)]
pub struct InMemoryAppointmentDirectory {
    appointments: Arc<RwLock<HashMap<Uuid, AppointmentEntity>>>,
}

impl InMemoryAppointmentDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert(&self, appointment: AppointmentEntity) {
        self.appointments
            .write()
            .await
            .insert(appointment.id, appointment);
    }
}

#[async_trait]
impl AppointmentDirectory for InMemoryAppointmentDirectory {
    async fn find_appointment(&self, appointment_id: Uuid) -> Result<Option<AppointmentEntity>> {
        let appointments = self.appointments.read().await;
        Ok(appointments.get(&appointment_id).cloned())
    }
}
