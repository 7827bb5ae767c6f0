use std::sync::Arc;

use tracing::warn;

use crate::domain::{
    entities::payments::PaymentEntity, repositories::notifications::NotificationSink,
    value_objects::payments::format_vnd,
};

/// Turns applied ledger transitions into payer messages. Delivery failures
/// are logged and swallowed; they never change a payment outcome.
#[derive(Clone)]
pub struct PaymentNotifier {
    sink: Arc<dyn NotificationSink + Send + Sync>,
}

impl PaymentNotifier {
    pub fn new(sink: Arc<dyn NotificationSink + Send + Sync>) -> Self {
        Self { sink }
    }

    pub async fn payment_completed(&self, payment: &PaymentEntity) {
        let message = format!(
            "Payment of {} VND for appointment {} completed (transaction {}).",
            format_vnd(payment.amount),
            payment.appointment_id,
            payment.transaction_id.as_deref().unwrap_or("-"),
        );
        self.deliver(payment, message).await;
    }

    pub async fn payment_failed(&self, payment: &PaymentEntity) {
        let message = format!(
            "Payment of {} VND for appointment {} failed: {}.",
            format_vnd(payment.amount),
            payment.appointment_id,
            payment.failure_reason.as_deref().unwrap_or("unknown reason"),
        );
        self.deliver(payment, message).await;
    }

    pub async fn refund_recorded(&self, refund: &PaymentEntity) {
        let message = format!(
            "A refund of {} VND for appointment {} has been recorded.",
            format_vnd(refund.amount.abs()),
            refund.appointment_id,
        );
        self.deliver(refund, message).await;
    }

    async fn deliver(&self, payment: &PaymentEntity, message: String) {
        if let Err(err) = self.sink.notify(payment.patient_id, message).await {
            warn!(
                payment_id = %payment.id,
                recipient = %payment.patient_id,
                error = ?err,
                "payment_notifications: delivery failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use mockall::predicate::{eq, function};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    use super::*;
    use crate::domain::{
        repositories::notifications::MockNotificationSink,
        value_objects::enums::{payment_methods::PaymentMethod, payment_statuses::PaymentStatus},
    };

    fn payment() -> PaymentEntity {
        PaymentEntity {
            id: Uuid::new_v4(),
            appointment_id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            doctor_id: Uuid::new_v4(),
            amount: dec!(500000),
            method: PaymentMethod::MoMo,
            status: PaymentStatus::Completed,
            transaction_id: Some("4088878653".into()),
            refund_of: None,
            failure_reason: None,
            description: None,
            created_at: Utc::now(),
            settled_at: Some(Utc::now()),
        }
    }

    #[tokio::test]
    async fn completion_message_goes_to_the_patient() {
        let payment = payment();
        let mut sink = MockNotificationSink::new();
        sink.expect_notify()
            .with(
                eq(payment.patient_id),
                function(|message: &String| {
                    message.contains("500,000 VND") && message.contains("4088878653")
                }),
            )
            .times(1)
            .returning(|_, _| Ok(()));

        PaymentNotifier::new(Arc::new(sink))
            .payment_completed(&payment)
            .await;
    }

    #[tokio::test]
    async fn sink_failure_is_swallowed() {
        let mut sink = MockNotificationSink::new();
        sink.expect_notify()
            .times(1)
            .returning(|_, _| Err(anyhow::anyhow!("webhook down")));

        PaymentNotifier::new(Arc::new(sink))
            .payment_failed(&payment())
            .await;
    }
}
