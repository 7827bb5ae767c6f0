use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::{
    domain::value_objects::enums::{
        payment_methods::PaymentMethod, payment_statuses::PaymentStatus,
    },
    infra::db::postgres::schema::payments,
};

/// One ledger row. Positive `amount` is a charge, negative a refund.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentEntity {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub refund_of: Option<Uuid>,
    pub failure_reason: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl PaymentEntity {
    pub fn is_refund(&self) -> bool {
        self.refund_of.is_some() || self.amount.is_sign_negative()
    }
}

/// New ledger row. Ids and timestamps are assigned by the caller so every store agrees.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertPaymentEntity {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub refund_of: Option<Uuid>,
    pub failure_reason: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl From<InsertPaymentEntity> for PaymentEntity {
    fn from(value: InsertPaymentEntity) -> Self {
        Self {
            id: value.id,
            appointment_id: value.appointment_id,
            patient_id: value.patient_id,
            doctor_id: value.doctor_id,
            amount: value.amount,
            method: value.method,
            status: value.status,
            transaction_id: value.transaction_id,
            refund_of: value.refund_of,
            failure_reason: value.failure_reason,
            description: value.description,
            created_at: value.created_at,
            settled_at: value.settled_at,
        }
    }
}

/// Raw row used for Diesel queries. Enum columns stay as text and are parsed into PaymentEntity.
#[derive(Debug, Clone, Identifiable, Selectable, Queryable)]
#[diesel(table_name = payments)]
pub struct PaymentRow {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub amount: Decimal,
    pub method: String,
    pub status: String,
    pub transaction_id: Option<String>,
    pub refund_of: Option<Uuid>,
    pub failure_reason: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl TryFrom<PaymentRow> for PaymentEntity {
    type Error = anyhow::Error;

    fn try_from(value: PaymentRow) -> Result<Self> {
        let method = PaymentMethod::from_str(&value.method)
            .ok_or_else(|| anyhow!("payment {} has unknown method {:?}", value.id, value.method))?;
        let status = PaymentStatus::from_str(&value.status)
            .ok_or_else(|| anyhow!("payment {} has unknown status {:?}", value.id, value.status))?;

        Ok(Self {
            id: value.id,
            appointment_id: value.appointment_id,
            patient_id: value.patient_id,
            doctor_id: value.doctor_id,
            amount: value.amount,
            method,
            status,
            transaction_id: value.transaction_id,
            refund_of: value.refund_of,
            failure_reason: value.failure_reason,
            description: value.description,
            created_at: value.created_at,
            settled_at: value.settled_at,
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = payments)]
pub struct InsertPaymentRow {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub amount: Decimal,
    pub method: String,
    pub status: String,
    pub transaction_id: Option<String>,
    pub refund_of: Option<Uuid>,
    pub failure_reason: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl From<InsertPaymentEntity> for InsertPaymentRow {
    fn from(value: InsertPaymentEntity) -> Self {
        Self {
            id: value.id,
            appointment_id: value.appointment_id,
            patient_id: value.patient_id,
            doctor_id: value.doctor_id,
            amount: value.amount,
            method: value.method.to_string(),
            status: value.status.to_string(),
            transaction_id: value.transaction_id,
            refund_of: value.refund_of,
            failure_reason: value.failure_reason,
            description: value.description,
            created_at: value.created_at,
            settled_at: value.settled_at,
        }
    }
}
