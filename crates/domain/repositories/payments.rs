use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::automock;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::{
    entities::payments::{InsertPaymentEntity, PaymentEntity},
    value_objects::payments::PaymentStatisticsModel,
};

#[derive(Debug, Clone, PartialEq)]
pub enum ChargeInsertOutcome {
    Inserted(PaymentEntity),
    /// Another PENDING charge already holds the appointment.
    OutstandingExists(Uuid),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefundAppendOutcome {
    Appended(PaymentEntity),
    InsufficientBalance { available: Decimal },
}

/// Append-only payment ledger. The only mutation a store offers is the
/// conditional PENDING -> terminal write.
#[automock]
#[async_trait]
pub trait PaymentRepository {
    /// Inserts a PENDING charge unless the appointment already has one outstanding.
    async fn insert_pending_charge(
        &self,
        charge: InsertPaymentEntity,
    ) -> Result<ChargeInsertOutcome>;

    async fn find_by_id(&self, payment_id: Uuid) -> Result<Option<PaymentEntity>>;

    /// Single conditional write. Returns `None` when the row was not PENDING.
    async fn complete_if_pending(
        &self,
        payment_id: Uuid,
        transaction_id: String,
        settled_at: DateTime<Utc>,
    ) -> Result<Option<PaymentEntity>>;

    /// Single conditional write. Returns `None` when the row was not PENDING.
    async fn fail_if_pending(
        &self,
        payment_id: Uuid,
        reason: String,
        settled_at: DateTime<Utc>,
    ) -> Result<Option<PaymentEntity>>;

    /// Appends a negative COMPLETED row against `refund.refund_of`. The balance
    /// check and the insert happen atomically.
    async fn append_refund(&self, refund: InsertPaymentEntity) -> Result<RefundAppendOutcome>;

    async fn list_stale_pending(
        &self,
        created_before: DateTime<Utc>,
        limit: Option<i64>,
    ) -> Result<Vec<PaymentEntity>>;

    async fn list_by_patient(&self, patient_id: Uuid) -> Result<Vec<PaymentEntity>>;

    async fn statistics(&self) -> Result<PaymentStatisticsModel>;
}
