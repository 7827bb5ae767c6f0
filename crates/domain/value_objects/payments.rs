use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{
    entities::payments::PaymentEntity,
    value_objects::enums::{
        gateways::Gateway, payment_methods::PaymentMethod, payment_statuses::PaymentStatus,
    },
};

/// Input to `PaymentStateMachine::create_charge`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCharge {
    pub appointment_id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub description: Option<String>,
}

/// Result of a terminal transition. `Replayed` means the row was already in the
/// requested state and nothing was written.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    Applied(PaymentEntity),
    Replayed(PaymentEntity),
}

impl TransitionOutcome {
    pub fn payment(&self) -> &PaymentEntity {
        match self {
            TransitionOutcome::Applied(payment) | TransitionOutcome::Replayed(payment) => payment,
        }
    }

    pub fn into_payment(self) -> PaymentEntity {
        match self {
            TransitionOutcome::Applied(payment) | TransitionOutcome::Replayed(payment) => payment,
        }
    }

    pub fn was_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied(_))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePaymentModel {
    pub appointment_id: Uuid,
    pub amount: Decimal,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RefundPaymentModel {
    pub reason: String,
    /// Defaults to the full original amount.
    pub amount: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PaymentDto {
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

impl From<PaymentEntity> for PaymentDto {
    fn from(value: PaymentEntity) -> Self {
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

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CreatedPaymentDto {
    pub payment_id: Uuid,
    pub gateway: Gateway,
    pub amount: Decimal,
    pub status: PaymentStatus,
    pub pay_url: String,
}

/// Aggregates over the ledger. Charge counters only look at positive rows;
/// refunds are tracked separately.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaymentStatisticsModel {
    pub pending_count: i64,
    pub completed_count: i64,
    pub failed_count: i64,
    pub gross_revenue: Decimal,
    pub refund_count: i64,
    pub refunded_total: Decimal,
    pub net_revenue_by_method: BTreeMap<String, Decimal>,
}

impl PaymentStatisticsModel {
    /// Folds one `(method, status, sign)` group into the totals.
    pub fn accumulate(
        &mut self,
        method: &str,
        status: PaymentStatus,
        is_refund: bool,
        count: i64,
        sum: Decimal,
    ) {
        if is_refund {
            if status == PaymentStatus::Completed {
                self.refund_count += count;
                self.refunded_total += sum.abs();
                *self
                    .net_revenue_by_method
                    .entry(method.to_string())
                    .or_default() += sum;
            }
            return;
        }

        match status {
            PaymentStatus::Pending => self.pending_count += count,
            PaymentStatus::Failed => self.failed_count += count,
            PaymentStatus::Completed => {
                self.completed_count += count;
                self.gross_revenue += sum;
                *self
                    .net_revenue_by_method
                    .entry(method.to_string())
                    .or_default() += sum;
            }
        }
    }

    pub fn from_payments<'a>(payments: impl IntoIterator<Item = &'a PaymentEntity>) -> Self {
        let mut stats = Self::default();
        for payment in payments {
            stats.accumulate(
                payment.method.as_str(),
                payment.status,
                payment.is_refund(),
                1,
                payment.amount,
            );
        }
        stats
    }

    pub fn total_charges(&self) -> i64 {
        self.pending_count + self.completed_count + self.failed_count
    }

    pub fn net_revenue(&self) -> Decimal {
        self.gross_revenue - self.refunded_total
    }

    /// Completed charges as a percentage of all charges, two decimals.
    pub fn success_rate(&self) -> Decimal {
        let total = self.total_charges();
        if total == 0 {
            return Decimal::ZERO;
        }
        (Decimal::from(self.completed_count) * Decimal::ONE_HUNDRED / Decimal::from(total))
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PaymentStatisticsDto {
    pub total_payments: i64,
    pub pending_payments: i64,
    pub completed_payments: i64,
    pub failed_payments: i64,
    pub refund_count: i64,
    pub refunded_total: Decimal,
    pub gross_revenue: Decimal,
    pub net_revenue: Decimal,
    pub revenue_by_method: BTreeMap<String, Decimal>,
    pub success_rate: Decimal,
}

impl From<PaymentStatisticsModel> for PaymentStatisticsDto {
    fn from(value: PaymentStatisticsModel) -> Self {
        Self {
            total_payments: value.total_charges(),
            pending_payments: value.pending_count,
            completed_payments: value.completed_count,
            failed_payments: value.failed_count,
            refund_count: value.refund_count,
            refunded_total: value.refunded_total,
            gross_revenue: value.gross_revenue,
            net_revenue: value.net_revenue(),
            success_rate: value.success_rate(),
            revenue_by_method: value.net_revenue_by_method,
        }
    }
}

/// Formats an amount as whole VND with thousands separators: `500000` -> `500,000`.
pub fn format_vnd(amount: Decimal) -> String {
    let rounded = amount.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    let digits = rounded.abs().trunc().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, ch) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if rounded.is_sign_negative() && !rounded.is_zero() {
        format!("-{grouped}")
    } else {
        grouped
    }
}
