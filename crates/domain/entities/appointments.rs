use anyhow::{Result, anyhow};
use diesel::prelude::*;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::{
    domain::value_objects::enums::appointment_statuses::AppointmentStatus,
    infra::db::postgres::schema::appointments,
};

/// The slice of an appointment the payment subsystem reads.
#[derive(Debug, Clone, PartialEq)]
pub struct AppointmentEntity {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub status: AppointmentStatus,
    pub amount_due: Option<Decimal>,
}

#[derive(Debug, Clone, Identifiable, Selectable, Queryable)]
#[diesel(table_name = appointments)]
pub struct AppointmentRow {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub status: String,
    pub amount_due: Option<Decimal>,
}

impl TryFrom<AppointmentRow> for AppointmentEntity {
    type Error = anyhow::Error;

    fn try_from(value: AppointmentRow) -> Result<Self> {
        let status = AppointmentStatus::from_str(&value.status).ok_or_else(|| {
            anyhow!(
                "appointment {} has unknown status {:?}",
                value.id,
                value.status
            )
        })?;

        Ok(Self {
            id: value.id,
            patient_id: value.patient_id,
            doctor_id: value.doctor_id,
            status,
            amount_due: value.amount_due,
        })
    }
}
