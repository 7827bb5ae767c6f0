use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    domain::{
        entities::payments::{InsertPaymentEntity, PaymentEntity},
        repositories::payments::{ChargeInsertOutcome, PaymentRepository, RefundAppendOutcome},
        value_objects::{
            enums::payment_statuses::PaymentStatus, payments::PaymentStatisticsModel,
        },
    },
    infra::db::repositories::payments::refundable_balance,
};

/// Ledger kept in insertion order behind one lock. Every check-and-set runs
/// under a single write guard, mirroring the conditional updates of the
/// Postgres store.
#[derive(Default, Clone)]
pub struct InMemoryPaymentRepository {
    payments: Arc<RwLock<Vec<PaymentEntity>>>,
}

impl InMemoryPaymentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a row as-is, bypassing every ledger rule. Fixtures only.
    pub async fn seed(&self, payment: PaymentEntity) {
        self.payments.write().await.push(payment);
    }

    pub async fn snapshot(&self) -> Vec<PaymentEntity> {
        self.payments.read().await.clone()
    }
}

#[async_trait]
impl PaymentRepository for InMemoryPaymentRepository {
    async fn insert_pending_charge(
        &self,
        charge: InsertPaymentEntity,
    ) -> Result<ChargeInsertOutcome> {
        let mut payments = self.payments.write().await;

        let outstanding = payments.iter().find(|payment| {
            payment.appointment_id == charge.appointment_id
                && payment.status == PaymentStatus::Pending
                && payment.amount > Decimal::ZERO
        });
        if let Some(existing) = outstanding {
            return Ok(ChargeInsertOutcome::OutstandingExists(existing.id));
        }

        let payment = PaymentEntity::from(charge);
        payments.push(payment.clone());
        Ok(ChargeInsertOutcome::Inserted(payment))
    }

    async fn find_by_id(&self, payment_id: Uuid) -> Result<Option<PaymentEntity>> {
        let payments = self.payments.read().await;
        Ok(payments.iter().find(|payment| payment.id == payment_id).cloned())
    }

    async fn complete_if_pending(
        &self,
        payment_id: Uuid,
        transaction_id: String,
        settled_at: DateTime<Utc>,
    ) -> Result<Option<PaymentEntity>> {
        let mut payments = self.payments.write().await;

        let Some(payment) = payments
            .iter_mut()
            .find(|payment| payment.id == payment_id && payment.status == PaymentStatus::Pending)
        else {
            return Ok(None);
        };

        payment.status = PaymentStatus::Completed;
        payment.transaction_id = Some(transaction_id);
        payment.settled_at = Some(settled_at);
        Ok(Some(payment.clone()))
    }

    async fn fail_if_pending(
        &self,
        payment_id: Uuid,
        reason: String,
        settled_at: DateTime<Utc>,
    ) -> Result<Option<PaymentEntity>> {
        let mut payments = self.payments.write().await;

        let Some(payment) = payments
            .iter_mut()
            .find(|payment| payment.id == payment_id && payment.status == PaymentStatus::Pending)
        else {
            return Ok(None);
        };

        payment.status = PaymentStatus::Failed;
        payment.failure_reason = Some(reason);
        payment.settled_at = Some(settled_at);
        Ok(Some(payment.clone()))
    }

    async fn append_refund(&self, refund: InsertPaymentEntity) -> Result<RefundAppendOutcome> {
        let original_id = refund
            .refund_of
            .ok_or_else(|| anyhow!("refund row {} has no original payment", refund.id))?;
        let mut payments = self.payments.write().await;

        let original = payments
            .iter()
            .find(|payment| payment.id == original_id)
            .cloned()
            .ok_or_else(|| anyhow!("original payment {original_id} not found"))?;

        let completed = |payment: &&PaymentEntity| payment.status == PaymentStatus::Completed;
        let refunded_against_original: Decimal = payments
            .iter()
            .filter(completed)
            .filter(|payment| payment.refund_of == Some(original_id))
            .map(|payment| payment.amount)
            .sum();
        let net_captured: Decimal = payments
            .iter()
            .filter(completed)
            .filter(|payment| payment.appointment_id == original.appointment_id)
            .map(|payment| payment.amount)
            .sum();

        let available =
            refundable_balance(original.amount, refunded_against_original, net_captured);
        if -refund.amount > available {
            return Ok(RefundAppendOutcome::InsufficientBalance { available });
        }

        let payment = PaymentEntity::from(refund);
        payments.push(payment.clone());
        Ok(RefundAppendOutcome::Appended(payment))
    }

    async fn list_stale_pending(
        &self,
        created_before: DateTime<Utc>,
        limit: Option<i64>,
    ) -> Result<Vec<PaymentEntity>> {
        let payments = self.payments.read().await;

        let mut stale: Vec<PaymentEntity> = payments
            .iter()
            .filter(|payment| {
                payment.status == PaymentStatus::Pending && payment.created_at < created_before
            })
            .cloned()
            .collect();
        stale.sort_by_key(|payment| payment.created_at);

        if let Some(limit) = limit {
            stale.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
        }
        Ok(stale)
    }

    async fn list_by_patient(&self, patient_id: Uuid) -> Result<Vec<PaymentEntity>> {
        let payments = self.payments.read().await;

        let mut rows: Vec<PaymentEntity> = payments
            .iter()
            .filter(|payment| payment.patient_id == patient_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn statistics(&self) -> Result<PaymentStatisticsModel> {
        let payments = self.payments.read().await;
        Ok(PaymentStatisticsModel::from_payments(payments.iter()))
    }
}
