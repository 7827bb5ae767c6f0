use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::{
    clock::Clock,
    entities::payments::{InsertPaymentEntity, PaymentEntity},
    errors::{PaymentError, PaymentResult},
    repositories::payments::{ChargeInsertOutcome, PaymentRepository, RefundAppendOutcome},
    value_objects::{
        enums::payment_statuses::PaymentStatus,
        payments::{NewCharge, TransitionOutcome},
    },
};

/// Sole writer of ledger status. Every terminal transition is one conditional
/// write; whoever loses the race reads the row back to decide between a replay
/// and an invalid transition.
#[derive(Clone)]
pub struct PaymentStateMachine {
    repository: Arc<dyn PaymentRepository + Send + Sync>,
    clock: Arc<dyn Clock>,
}

impl PaymentStateMachine {
    pub fn new(repository: Arc<dyn PaymentRepository + Send + Sync>, clock: Arc<dyn Clock>) -> Self {
        Self { repository, clock }
    }

    pub async fn create_charge(&self, charge: NewCharge) -> PaymentResult<PaymentEntity> {
        if charge.amount <= Decimal::ZERO {
            return Err(PaymentError::validation("amount must be greater than zero"));
        }

        let appointment_id = charge.appointment_id;
        let insert = InsertPaymentEntity {
            id: Uuid::new_v4(),
            appointment_id,
            patient_id: charge.patient_id,
            doctor_id: charge.doctor_id,
            amount: charge.amount,
            method: charge.method,
            status: PaymentStatus::Pending,
            transaction_id: None,
            refund_of: None,
            failure_reason: None,
            description: charge.description,
            created_at: self.clock.now(),
            settled_at: None,
        };

        let outcome = self
            .repository
            .insert_pending_charge(insert)
            .await
            .map_err(|err| {
                error!(%appointment_id, db_error = ?err, "payment_state: failed to insert charge");
                PaymentError::Internal(err)
            })?;

        match outcome {
            ChargeInsertOutcome::Inserted(payment) => {
                info!(
                    payment_id = %payment.id,
                    %appointment_id,
                    amount = %payment.amount,
                    method = %payment.method,
                    "payment_state: pending charge created"
                );
                Ok(payment)
            }
            ChargeInsertOutcome::OutstandingExists(existing_payment_id) => {
                warn!(
                    %appointment_id,
                    %existing_payment_id,
                    "payment_state: appointment already has an outstanding charge"
                );
                Err(PaymentError::Conflict {
                    appointment_id,
                    existing_payment_id,
                })
            }
        }
    }

    pub async fn mark_completed(
        &self,
        payment_id: Uuid,
        transaction_id: &str,
    ) -> PaymentResult<TransitionOutcome> {
        let transaction_id = transaction_id.trim();
        if transaction_id.is_empty() {
            return Err(PaymentError::validation("transaction id is required"));
        }

        let updated = self
            .repository
            .complete_if_pending(payment_id, transaction_id.to_string(), self.clock.now())
            .await
            .map_err(|err| {
                error!(%payment_id, db_error = ?err, "payment_state: failed to complete payment");
                PaymentError::Internal(err)
            })?;

        if let Some(payment) = updated {
            info!(%payment_id, %transaction_id, "payment_state: payment completed");
            return Ok(TransitionOutcome::Applied(payment));
        }

        let current = self.load(payment_id).await?;
        if current.status == PaymentStatus::Completed
            && current.transaction_id.as_deref() == Some(transaction_id)
        {
            info!(%payment_id, %transaction_id, "payment_state: completion replayed");
            return Ok(TransitionOutcome::Replayed(current));
        }

        warn!(
            %payment_id,
            current_status = %current.status,
            stored_transaction_id = ?current.transaction_id,
            %transaction_id,
            "payment_state: completion rejected for settled payment"
        );
        Err(PaymentError::InvalidState {
            payment_id,
            current: current.status,
            attempted: format!("complete with transaction {transaction_id}"),
        })
    }

    pub async fn mark_failed(
        &self,
        payment_id: Uuid,
        reason: &str,
    ) -> PaymentResult<TransitionOutcome> {
        let updated = self
            .repository
            .fail_if_pending(payment_id, reason.to_string(), self.clock.now())
            .await
            .map_err(|err| {
                error!(%payment_id, db_error = ?err, "payment_state: failed to fail payment");
                PaymentError::Internal(err)
            })?;

        if let Some(payment) = updated {
            info!(%payment_id, %reason, "payment_state: payment failed");
            return Ok(TransitionOutcome::Applied(payment));
        }

        let current = self.load(payment_id).await?;
        if current.status == PaymentStatus::Failed {
            info!(%payment_id, "payment_state: failure replayed");
            return Ok(TransitionOutcome::Replayed(current));
        }

        warn!(
            %payment_id,
            current_status = %current.status,
            %reason,
            "payment_state: failure rejected for settled payment"
        );
        Err(PaymentError::InvalidState {
            payment_id,
            current: current.status,
            attempted: "mark as failed".to_string(),
        })
    }

    /// Appends a negative COMPLETED row against a completed charge. The
    /// original row is never modified. `amount` defaults to the full charge.
    pub async fn refund(
        &self,
        payment_id: Uuid,
        reason: &str,
        amount: Option<Decimal>,
    ) -> PaymentResult<PaymentEntity> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(PaymentError::validation("refund reason is required"));
        }

        let original = self.load(payment_id).await?;
        if original.status != PaymentStatus::Completed
            || original.is_refund()
            || original.amount <= Decimal::ZERO
        {
            warn!(
                %payment_id,
                current_status = %original.status,
                amount = %original.amount,
                "payment_state: refund rejected for non-refundable row"
            );
            return Err(PaymentError::InvalidState {
                payment_id,
                current: original.status,
                attempted: "refund".to_string(),
            });
        }

        let requested = amount.unwrap_or(original.amount);
        if requested <= Decimal::ZERO {
            return Err(PaymentError::validation(
                "refund amount must be greater than zero",
            ));
        }

        let now = self.clock.now();
        let refund = InsertPaymentEntity {
            id: Uuid::new_v4(),
            appointment_id: original.appointment_id,
            patient_id: original.patient_id,
            doctor_id: original.doctor_id,
            amount: -requested,
            method: original.method,
            status: PaymentStatus::Completed,
            transaction_id: Some(format!("RF{}", Uuid::new_v4().simple())),
            refund_of: Some(original.id),
            failure_reason: None,
            description: Some(format!("Refund: {reason}")),
            created_at: now,
            settled_at: Some(now),
        };

        let outcome = self.repository.append_refund(refund).await.map_err(|err| {
            error!(%payment_id, db_error = ?err, "payment_state: failed to append refund");
            PaymentError::Internal(err)
        })?;

        match outcome {
            RefundAppendOutcome::Appended(refund) => {
                info!(
                    %payment_id,
                    refund_id = %refund.id,
                    amount = %refund.amount,
                    "payment_state: refund recorded"
                );
                Ok(refund)
            }
            RefundAppendOutcome::InsufficientBalance { available } => {
                warn!(
                    %payment_id,
                    %requested,
                    %available,
                    "payment_state: refund exceeds captured balance"
                );
                Err(PaymentError::InsufficientBalance {
                    requested,
                    available,
                })
            }
        }
    }

    async fn load(&self, payment_id: Uuid) -> PaymentResult<PaymentEntity> {
        self.repository
            .find_by_id(payment_id)
            .await
            .map_err(|err| {
                error!(%payment_id, db_error = ?err, "payment_state: failed to load payment");
                PaymentError::Internal(err)
            })?
            .ok_or(PaymentError::NotFound(payment_id))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use mockall::predicate::eq;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::{
        domain::{
            clock::ManualClock, repositories::payments::MockPaymentRepository,
            value_objects::enums::payment_methods::PaymentMethod,
        },
        infra::memory::payments::InMemoryPaymentRepository,
    };

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap(),
        ))
    }

    fn machine() -> (PaymentStateMachine, InMemoryPaymentRepository) {
        let store = InMemoryPaymentRepository::new();
        let machine = PaymentStateMachine::new(Arc::new(store.clone()), clock());
        (machine, store)
    }

    fn charge(appointment_id: Uuid, amount: Decimal) -> NewCharge {
        NewCharge {
            appointment_id,
            patient_id: Uuid::new_v4(),
            doctor_id: Uuid::new_v4(),
            amount,
            method: PaymentMethod::VnPay,
            description: None,
        }
    }

    async fn completed_charge(machine: &PaymentStateMachine, amount: Decimal) -> PaymentEntity {
        let payment = machine
            .create_charge(charge(Uuid::new_v4(), amount))
            .await
            .unwrap();
        machine
            .mark_completed(payment.id, "TX-1")
            .await
            .unwrap()
            .into_payment()
    }

    #[tokio::test]
    async fn create_charge_rejects_non_positive_amounts() {
        let (machine, store) = machine();

        for amount in [dec!(0), dec!(-1)] {
            let err = machine
                .create_charge(charge(Uuid::new_v4(), amount))
                .await
                .unwrap_err();
            assert!(matches!(err, PaymentError::Validation(_)));
        }
        assert!(store.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn second_charge_for_appointment_conflicts_without_new_row() {
        let (machine, store) = machine();
        let appointment_id = Uuid::new_v4();

        let first = machine
            .create_charge(charge(appointment_id, dec!(500000)))
            .await
            .unwrap();
        assert_eq!(first.status, PaymentStatus::Pending);

        let err = machine
            .create_charge(charge(appointment_id, dec!(500000)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PaymentError::Conflict { existing_payment_id, .. } if existing_payment_id == first.id
        ));
        assert_eq!(store.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn settled_charge_frees_the_appointment() {
        let (machine, _) = machine();
        let appointment_id = Uuid::new_v4();

        let first = machine
            .create_charge(charge(appointment_id, dec!(500000)))
            .await
            .unwrap();
        machine.mark_failed(first.id, "cancelled").await.unwrap();

        assert!(
            machine
                .create_charge(charge(appointment_id, dec!(500000)))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn repeated_completion_is_applied_once() {
        let (machine, store) = machine();
        let payment = machine
            .create_charge(charge(Uuid::new_v4(), dec!(500000)))
            .await
            .unwrap();

        let mut applied = 0;
        for _ in 0..5 {
            let outcome = machine.mark_completed(payment.id, "14123456").await.unwrap();
            if outcome.was_applied() {
                applied += 1;
            }
            assert_eq!(outcome.payment().transaction_id.as_deref(), Some("14123456"));
        }

        assert_eq!(applied, 1);
        let rows = store.snapshot().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, PaymentStatus::Completed);
    }

    #[tokio::test]
    async fn completion_with_other_transaction_is_invalid() {
        let (machine, _) = machine();
        let payment = completed_charge(&machine, dec!(500000)).await;

        let err = machine
            .mark_completed(payment.id, "TX-2")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PaymentError::InvalidState { current: PaymentStatus::Completed, .. }
        ));
    }

    #[tokio::test]
    async fn failure_is_replayable_but_never_overrides_completion() {
        let (machine, _) = machine();
        let pending = machine
            .create_charge(charge(Uuid::new_v4(), dec!(100000)))
            .await
            .unwrap();

        assert!(machine.mark_failed(pending.id, "24").await.unwrap().was_applied());
        assert!(!machine.mark_failed(pending.id, "24").await.unwrap().was_applied());
        assert!(matches!(
            machine.mark_completed(pending.id, "TX").await.unwrap_err(),
            PaymentError::InvalidState { current: PaymentStatus::Failed, .. }
        ));

        let completed = completed_charge(&machine, dec!(100000)).await;
        assert!(matches!(
            machine.mark_failed(completed.id, "late").await.unwrap_err(),
            PaymentError::InvalidState { current: PaymentStatus::Completed, .. }
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_success_and_failure_resolve_to_one_state() {
        for _ in 0..20 {
            let (machine, store) = machine();
            let payment = machine
                .create_charge(charge(Uuid::new_v4(), dec!(500000)))
                .await
                .unwrap();

            let (completed, failed) = tokio::join!(
                machine.mark_completed(payment.id, "TX-RACE"),
                machine.mark_failed(payment.id, "gateway reported failure"),
            );

            let stored = store.find_by_id(payment.id).await.unwrap().unwrap();
            match stored.status {
                PaymentStatus::Completed => {
                    assert!(completed.unwrap().was_applied());
                    assert!(matches!(failed, Err(PaymentError::InvalidState { .. })));
                }
                PaymentStatus::Failed => {
                    assert!(failed.unwrap().was_applied());
                    assert!(matches!(completed, Err(PaymentError::InvalidState { .. })));
                }
                PaymentStatus::Pending => panic!("payment left pending"),
            }
        }
    }

    #[tokio::test]
    async fn refund_is_bounded_by_captured_amount() {
        let (machine, store) = machine();
        let original = completed_charge(&machine, dec!(500000)).await;

        let err = machine
            .refund(original.id, "doctor unavailable", Some(dec!(500001)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PaymentError::InsufficientBalance { available, .. } if available == dec!(500000)
        ));

        let refund = machine
            .refund(original.id, "doctor unavailable", Some(dec!(500000)))
            .await
            .unwrap();
        assert_eq!(refund.amount, dec!(-500000));
        assert_eq!(refund.status, PaymentStatus::Completed);
        assert_eq!(refund.refund_of, Some(original.id));
        assert_eq!(refund.appointment_id, original.appointment_id);
        assert!(refund.transaction_id.as_deref().unwrap().starts_with("RF"));

        let stored_original = store.find_by_id(original.id).await.unwrap().unwrap();
        assert_eq!(stored_original, original);

        assert!(matches!(
            machine.refund(original.id, "again", None).await.unwrap_err(),
            PaymentError::InsufficientBalance { available, .. } if available.is_zero()
        ));
    }

    #[tokio::test]
    async fn partial_refunds_accumulate() {
        let (machine, _) = machine();
        let original = completed_charge(&machine, dec!(500000)).await;

        machine
            .refund(original.id, "partial", Some(dec!(200000)))
            .await
            .unwrap();
        machine
            .refund(original.id, "partial", Some(dec!(300000)))
            .await
            .unwrap();
        assert!(matches!(
            machine
                .refund(original.id, "partial", Some(dec!(1)))
                .await
                .unwrap_err(),
            PaymentError::InsufficientBalance { .. }
        ));
    }

    #[tokio::test]
    async fn only_completed_charges_are_refundable() {
        let (machine, _) = machine();
        let pending = machine
            .create_charge(charge(Uuid::new_v4(), dec!(500000)))
            .await
            .unwrap();
        assert!(matches!(
            machine.refund(pending.id, "reason", None).await.unwrap_err(),
            PaymentError::InvalidState { current: PaymentStatus::Pending, .. }
        ));

        let original = completed_charge(&machine, dec!(500000)).await;
        let refund = machine.refund(original.id, "reason", None).await.unwrap();
        assert!(matches!(
            machine.refund(refund.id, "reason", None).await.unwrap_err(),
            PaymentError::InvalidState { .. }
        ));
    }

    #[tokio::test]
    async fn unknown_payment_is_not_found() {
        let mut repository = MockPaymentRepository::new();
        let payment_id = Uuid::new_v4();
        repository
            .expect_complete_if_pending()
            .returning(|_, _, _| Ok(None));
        repository
            .expect_find_by_id()
            .with(eq(payment_id))
            .returning(|_| Ok(None));

        let machine = PaymentStateMachine::new(Arc::new(repository), clock());
        let err = machine.mark_completed(payment_id, "TX").await.unwrap_err();
        assert!(matches!(err, PaymentError::NotFound(id) if id == payment_id));
    }
}
