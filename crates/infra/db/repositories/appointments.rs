use anyhow::Result;
use async_trait::async_trait;
use diesel::{RunQueryDsl, prelude::*};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    domain,
    infra::db::postgres::{postgres_connection::PgPoolSquad, schema::appointments},
};
use domain::{
    entities::appointments::{AppointmentEntity, AppointmentRow},
    repositories::appointments::AppointmentDirectory,
};

pub struct AppointmentPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl AppointmentPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl AppointmentDirectory for AppointmentPostgres {
    async fn find_appointment(&self, appointment_id: Uuid) -> Result<Option<AppointmentEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let row = appointments::table
            .filter(appointments::id.eq(appointment_id))
            .select(AppointmentRow::as_select())
            .first::<AppointmentRow>(&mut conn)
            .optional()?;

        row.map(AppointmentEntity::try_from).transpose()
    }
}
