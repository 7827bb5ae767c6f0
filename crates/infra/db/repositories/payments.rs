use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::{
    RunQueryDsl,
    dsl::{count, sum},
    insert_into,
    prelude::*,
    result::{DatabaseErrorKind, Error as DieselError},
    update,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::{
    domain,
    infra::db::postgres::{postgres_connection::PgPoolSquad, schema::payments},
};
use domain::{
    entities::payments::{InsertPaymentEntity, InsertPaymentRow, PaymentEntity, PaymentRow},
    repositories::payments::{ChargeInsertOutcome, PaymentRepository, RefundAppendOutcome},
    value_objects::{enums::payment_statuses::PaymentStatus, payments::PaymentStatisticsModel},
};

pub struct PaymentPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl PaymentPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

fn into_entities(rows: Vec<PaymentRow>) -> Result<Vec<PaymentEntity>> {
    rows.into_iter().map(PaymentEntity::try_from).collect()
}

/// Largest refund still allowed against `original`: bounded by what is left of the
/// original charge and by the net captured total of its appointment.
pub(crate) fn refundable_balance(
    original_amount: Decimal,
    refunded_against_original: Decimal,
    net_captured_for_appointment: Decimal,
) -> Decimal {
    let left_on_original = original_amount + refunded_against_original;
    left_on_original
        .min(net_captured_for_appointment)
        .max(Decimal::ZERO)
}

const CHARGE_INSERT_ATTEMPTS: usize = 2;

/// Next step after the one-outstanding-charge index rejected an insert.
#[derive(Debug, PartialEq)]
enum UniqueViolationStep {
    Outstanding(Uuid),
    Retry,
    GiveUp,
}

/// `holder` is the PENDING charge found after the violation. None means it
/// settled in between, so the slot is free again.
fn after_unique_violation(holder: Option<Uuid>, attempt: usize) -> UniqueViolationStep {
    match holder {
        Some(existing_payment_id) => UniqueViolationStep::Outstanding(existing_payment_id),
        None if attempt < CHARGE_INSERT_ATTEMPTS => UniqueViolationStep::Retry,
        None => UniqueViolationStep::GiveUp,
    }
}

#[async_trait]
impl PaymentRepository for PaymentPostgres {
    async fn insert_pending_charge(
        &self,
        charge: InsertPaymentEntity,
    ) -> Result<ChargeInsertOutcome> {
        let mut conn = Arc::clone(&self.db_pool).get()?;
        let appointment_id = charge.appointment_id;
        let row = InsertPaymentRow::from(charge);

        for attempt in 1..=CHARGE_INSERT_ATTEMPTS {
            let inserted = insert_into(payments::table)
                .values(&row)
                .returning(PaymentRow::as_returning())
                .get_result::<PaymentRow>(&mut conn);

            let err = match inserted {
                Ok(inserted) => {
                    return Ok(ChargeInsertOutcome::Inserted(PaymentEntity::try_from(inserted)?));
                }
                Err(err) => err,
            };
            if !matches!(
                err,
                DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)
            ) {
                return Err(err.into());
            }

            let holder = payments::table
                .filter(payments::appointment_id.eq(appointment_id))
                .filter(payments::status.eq(PaymentStatus::Pending.as_str()))
                .filter(payments::amount.gt(Decimal::ZERO))
                .select(payments::id)
                .first::<Uuid>(&mut conn)
                .optional()?;

            match after_unique_violation(holder, attempt) {
                UniqueViolationStep::Outstanding(existing_payment_id) => {
                    return Ok(ChargeInsertOutcome::OutstandingExists(existing_payment_id));
                }
                UniqueViolationStep::Retry => {
                    info!(%appointment_id, attempt, "payments_repo: outstanding charge settled during insert; retrying");
                }
                UniqueViolationStep::GiveUp => break,
            }
        }

        Err(anyhow!(
            "charge for appointment {appointment_id} still conflicts after {CHARGE_INSERT_ATTEMPTS} attempts"
        ))
    }

    async fn find_by_id(&self, payment_id: Uuid) -> Result<Option<PaymentEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let row = payments::table
            .filter(payments::id.eq(payment_id))
            .select(PaymentRow::as_select())
            .first::<PaymentRow>(&mut conn)
            .optional()?;

        row.map(PaymentEntity::try_from).transpose()
    }

    async fn complete_if_pending(
        &self,
        payment_id: Uuid,
        transaction_id: String,
        settled_at: DateTime<Utc>,
    ) -> Result<Option<PaymentEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let row = update(payments::table)
            .filter(payments::id.eq(payment_id))
            .filter(payments::status.eq(PaymentStatus::Pending.as_str()))
            .set((
                payments::status.eq(PaymentStatus::Completed.as_str()),
                payments::transaction_id.eq(Some(transaction_id)),
                payments::settled_at.eq(Some(settled_at)),
            ))
            .returning(PaymentRow::as_returning())
            .get_result::<PaymentRow>(&mut conn)
            .optional()?;

        row.map(PaymentEntity::try_from).transpose()
    }

    async fn fail_if_pending(
        &self,
        payment_id: Uuid,
        reason: String,
        settled_at: DateTime<Utc>,
    ) -> Result<Option<PaymentEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let row = update(payments::table)
            .filter(payments::id.eq(payment_id))
            .filter(payments::status.eq(PaymentStatus::Pending.as_str()))
            .set((
                payments::status.eq(PaymentStatus::Failed.as_str()),
                payments::failure_reason.eq(Some(reason)),
                payments::settled_at.eq(Some(settled_at)),
            ))
            .returning(PaymentRow::as_returning())
            .get_result::<PaymentRow>(&mut conn)
            .optional()?;

        row.map(PaymentEntity::try_from).transpose()
    }

    async fn append_refund(&self, refund: InsertPaymentEntity) -> Result<RefundAppendOutcome> {
        let mut conn = Arc::clone(&self.db_pool).get()?;
        let original_id = refund
            .refund_of
            .ok_or_else(|| anyhow!("refund row {} has no original payment", refund.id))?;

        conn.transaction::<RefundAppendOutcome, anyhow::Error, _>(|conn| {
            let appointment_id = payments::table
                .filter(payments::id.eq(original_id))
                .select(payments::appointment_id)
                .first::<Uuid>(conn)?;

            // Every row of the appointment, locked in id order, so refunds against
            // any of its charges see one consistent captured balance.
            let locked = payments::table
                .filter(payments::appointment_id.eq(appointment_id))
                .order(payments::id.asc())
                .select(PaymentRow::as_select())
                .for_update()
                .load::<PaymentRow>(conn)?;
            let original = locked
                .into_iter()
                .find(|row| row.id == original_id)
                .ok_or_else(|| anyhow!("payment {original_id} vanished while locking"))?;

            let refunded_against_original = payments::table
                .filter(payments::refund_of.eq(original_id))
                .filter(payments::status.eq(PaymentStatus::Completed.as_str()))
                .select(sum(payments::amount))
                .first::<Option<Decimal>>(conn)?
                .unwrap_or_default();

            let net_captured = payments::table
                .filter(payments::appointment_id.eq(original.appointment_id))
                .filter(payments::status.eq(PaymentStatus::Completed.as_str()))
                .select(sum(payments::amount))
                .first::<Option<Decimal>>(conn)?
                .unwrap_or_default();

            let available =
                refundable_balance(original.amount, refunded_against_original, net_captured);
            if -refund.amount > available {
                return Ok(RefundAppendOutcome::InsufficientBalance { available });
            }

            let row = insert_into(payments::table)
                .values(InsertPaymentRow::from(refund))
                .returning(PaymentRow::as_returning())
                .get_result::<PaymentRow>(conn)?;

            Ok(RefundAppendOutcome::Appended(PaymentEntity::try_from(row)?))
        })
    }

    async fn list_stale_pending(
        &self,
        created_before: DateTime<Utc>,
        limit: Option<i64>,
    ) -> Result<Vec<PaymentEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let mut query = payments::table
            .filter(payments::status.eq(PaymentStatus::Pending.as_str()))
            .filter(payments::created_at.lt(created_before))
            .order(payments::created_at.asc())
            .select(PaymentRow::as_select())
            .into_boxed();

        if let Some(limit) = limit {
            query = query.limit(limit);
        }

        into_entities(query.load::<PaymentRow>(&mut conn)?)
    }

    async fn list_by_patient(&self, patient_id: Uuid) -> Result<Vec<PaymentEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let rows = payments::table
            .filter(payments::patient_id.eq(patient_id))
            .order(payments::created_at.desc())
            .select(PaymentRow::as_select())
            .load::<PaymentRow>(&mut conn)?;

        into_entities(rows)
    }

    async fn statistics(&self) -> Result<PaymentStatisticsModel> {
        let mut conn = Arc::clone(&self.db_pool).get()?;
        let mut stats = PaymentStatisticsModel::default();

        let charges = payments::table
            .filter(payments::amount.gt(Decimal::ZERO))
            .group_by((payments::method, payments::status))
            .select((
                payments::method,
                payments::status,
                count(payments::id),
                sum(payments::amount),
            ))
            .load::<(String, String, i64, Option<Decimal>)>(&mut conn)?;

        let refunds = payments::table
            .filter(payments::amount.lt(Decimal::ZERO))
            .group_by((payments::method, payments::status))
            .select((
                payments::method,
                payments::status,
                count(payments::id),
                sum(payments::amount),
            ))
            .load::<(String, String, i64, Option<Decimal>)>(&mut conn)?;

        let groups = charges
            .into_iter()
            .map(|group| (false, group))
            .chain(refunds.into_iter().map(|group| (true, group)));

        for (is_refund, (method, status, rows, total)) in groups {
            let status = PaymentStatus::from_str(&status)
                .ok_or_else(|| anyhow!("unknown payment status {status:?} in ledger"))?;
            stats.accumulate(&method, status, is_refund, rows, total.unwrap_or_default());
        }

        Ok(stats)
    }
}
