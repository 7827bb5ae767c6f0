use std::sync::Arc;

use chrono::Duration;
use crates::{
    application::{
        payment_notifications::PaymentNotifier, payment_state_machine::PaymentStateMachine,
    },
    domain::{
        clock::Clock,
        entities::payments::PaymentEntity,
        errors::{PaymentError, PaymentResult},
        repositories::{appointments::AppointmentDirectory, payments::PaymentRepository},
        value_objects::{
            enums::{appointment_statuses::AppointmentStatus, gateways::Gateway},
            payments::{
                CreatePaymentModel, CreatedPaymentDto, NewCharge, PaymentDto,
                PaymentStatisticsDto, RefundPaymentModel, TransitionOutcome,
            },
        },
    },
    observability::ANOMALY_TARGET,
    payments::gateway::{ChargeRequest, GatewayRegistry, GatewayStatus},
};
use rust_decimal::Decimal;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Charge creation, reads, refunds and admin operations over the ledger.
pub struct PaymentUseCase {
    appointments: Arc<dyn AppointmentDirectory + Send + Sync>,
    repository: Arc<dyn PaymentRepository + Send + Sync>,
    state_machine: PaymentStateMachine,
    gateways: GatewayRegistry,
    notifier: PaymentNotifier,
    clock: Arc<dyn Clock>,
    stale_after: Duration,
}

impl PaymentUseCase {
    pub fn new(
        appointments: Arc<dyn AppointmentDirectory + Send + Sync>,
        repository: Arc<dyn PaymentRepository + Send + Sync>,
        state_machine: PaymentStateMachine,
        gateways: GatewayRegistry,
        notifier: PaymentNotifier,
        clock: Arc<dyn Clock>,
        stale_after: Duration,
    ) -> Self {
        Self {
            appointments,
            repository,
            state_machine,
            gateways,
            notifier,
            clock,
            stale_after,
        }
    }

    pub async fn create_payment(
        &self,
        gateway: Gateway,
        model: CreatePaymentModel,
        client_ip: String,
    ) -> PaymentResult<CreatedPaymentDto> {
        let appointment_id = model.appointment_id;
        info!(%appointment_id, %gateway, amount = %model.amount, "payments: create requested");

        let client = self.gateways.get(gateway).ok_or_else(|| {
            PaymentError::validation(format!("payment gateway {gateway} is not enabled"))
        })?;

        let appointment = self
            .appointments
            .find_appointment(appointment_id)
            .await
            .map_err(|err| {
                error!(%appointment_id, db_error = ?err, "payments: failed to load appointment");
                PaymentError::Internal(err)
            })?
            .ok_or_else(|| PaymentError::validation("appointment not found"))?;

        if appointment.status != AppointmentStatus::Confirmed {
            return Err(PaymentError::validation(format!(
                "appointment is {}; only confirmed appointments can be paid",
                appointment.status
            )));
        }
        if model.amount <= Decimal::ZERO {
            return Err(PaymentError::validation("amount must be greater than zero"));
        }
        if let Some(amount_due) = appointment.amount_due {
            if amount_due != model.amount {
                return Err(PaymentError::validation(format!(
                    "amount must equal the amount due ({amount_due})"
                )));
            }
        }
        if gateway == Gateway::MoMo && !model.amount.fract().is_zero() {
            return Err(PaymentError::validation("MoMo amounts must be whole VND"));
        }

        let order_info = model
            .description
            .filter(|description| !description.trim().is_empty())
            .unwrap_or_else(|| format!("Payment for appointment {appointment_id}"));

        let payment = self
            .state_machine
            .create_charge(NewCharge {
                appointment_id,
                patient_id: appointment.patient_id,
                doctor_id: appointment.doctor_id,
                amount: model.amount,
                method: gateway.payment_method(),
                description: Some(order_info.clone()),
            })
            .await?;

        let checkout = client
            .initiate(&ChargeRequest {
                payment_id: payment.id,
                amount: payment.amount,
                order_info,
                client_ip,
                created_at: payment.created_at,
            })
            .await
            .map_err(|err| {
                // The row stays PENDING; a notification or the sweep settles it.
                warn!(
                    payment_id = %payment.id,
                    %gateway,
                    gateway_error = %err,
                    "payments: gateway initiation failed"
                );
                PaymentError::Gateway(err)
            })?;

        info!(payment_id = %payment.id, %gateway, "payments: checkout created");
        Ok(CreatedPaymentDto {
            payment_id: payment.id,
            gateway,
            amount: payment.amount,
            status: payment.status,
            pay_url: checkout.pay_url,
        })
    }

    pub async fn get_payment(&self, payment_id: Uuid) -> PaymentResult<PaymentDto> {
        self.load(payment_id).await.map(PaymentDto::from)
    }

    pub async fn list_patient_payments(&self, patient_id: Uuid) -> PaymentResult<Vec<PaymentDto>> {
        let payments = self
            .repository
            .list_by_patient(patient_id)
            .await
            .map_err(|err| {
                error!(%patient_id, db_error = ?err, "payments: failed to list patient payments");
                PaymentError::Internal(err)
            })?;
        Ok(payments.into_iter().map(PaymentDto::from).collect())
    }

    pub async fn refund(
        &self,
        payment_id: Uuid,
        model: RefundPaymentModel,
    ) -> PaymentResult<PaymentDto> {
        info!(%payment_id, amount = ?model.amount, "payments: refund requested");
        let refund = self
            .state_machine
            .refund(payment_id, &model.reason, model.amount)
            .await?;
        self.notifier.refund_recorded(&refund).await;
        Ok(PaymentDto::from(refund))
    }

    /// Asks the gateway about a payment and applies what it reports. A gateway
    /// that cannot be reached leaves the row untouched.
    pub async fn check_status_from_gateway(&self, payment_id: Uuid) -> PaymentResult<PaymentDto> {
        let payment = self.load(payment_id).await?;
        if payment.status.is_terminal() {
            info!(%payment_id, status = %payment.status, "payments: status check skipped, already settled");
            return Ok(PaymentDto::from(payment));
        }

        let gateway = payment.method.gateway().ok_or_else(|| {
            PaymentError::validation(format!(
                "payment method {} is not settled by a gateway",
                payment.method
            ))
        })?;
        let client = self.gateways.get(gateway).ok_or_else(|| {
            PaymentError::validation(format!("payment gateway {gateway} is not enabled"))
        })?;

        let status = client.query_status(&payment).await.map_err(|err| {
            warn!(%payment_id, %gateway, gateway_error = %err, "payments: status check failed");
            PaymentError::Gateway(err)
        })?;

        let outcome = match status {
            GatewayStatus::Succeeded { transaction_id } => {
                self.state_machine
                    .mark_completed(payment_id, &transaction_id)
                    .await
            }
            GatewayStatus::Failed { code, message } => {
                self.state_machine
                    .mark_failed(payment_id, &format!("{gateway} {code}: {message}"))
                    .await
            }
            GatewayStatus::Pending => {
                info!(%payment_id, %gateway, "payments: gateway reports payment still pending");
                return Ok(PaymentDto::from(payment));
            }
            GatewayStatus::Unknown { reason } => {
                error!(
                    target: ANOMALY_TARGET,
                    %payment_id,
                    %gateway,
                    %reason,
                    "payments: untrusted gateway status ignored"
                );
                return Ok(PaymentDto::from(payment));
            }
        };

        match outcome {
            Ok(outcome) => {
                self.announce(&outcome).await;
                Ok(PaymentDto::from(outcome.into_payment()))
            }
            Err(err @ PaymentError::InvalidState { .. }) => {
                error!(
                    target: ANOMALY_TARGET,
                    %payment_id,
                    %gateway,
                    error = %err,
                    "payments: gateway status contradicts settled payment"
                );
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    pub async fn statistics(&self) -> PaymentResult<PaymentStatisticsDto> {
        let stats = self.repository.statistics().await.map_err(|err| {
            error!(db_error = ?err, "payments: failed to compute statistics");
            PaymentError::Internal(err)
        })?;
        Ok(PaymentStatisticsDto::from(stats))
    }

    pub async fn list_stale_pending(&self) -> PaymentResult<Vec<PaymentDto>> {
        let cutoff = self.clock.now() - self.stale_after;
        let stale = self
            .repository
            .list_stale_pending(cutoff, None)
            .await
            .map_err(|err| {
                error!(db_error = ?err, "payments: failed to list stale pending payments");
                PaymentError::Internal(err)
            })?;
        Ok(stale.into_iter().map(PaymentDto::from).collect())
    }

    async fn announce(&self, outcome: &TransitionOutcome) {
        if let TransitionOutcome::Applied(payment) = outcome {
            notify_applied(&self.notifier, payment).await;
        }
    }

    async fn load(&self, payment_id: Uuid) -> PaymentResult<PaymentEntity> {
        self.repository
            .find_by_id(payment_id)
            .await
            .map_err(|err| {
                error!(%payment_id, db_error = ?err, "payments: failed to load payment");
                PaymentError::Internal(err)
            })?
            .ok_or(PaymentError::NotFound(payment_id))
    }
}

/// Sends the payer message matching an applied terminal transition.
pub(crate) async fn notify_applied(notifier: &PaymentNotifier, payment: &PaymentEntity) {
    use crates::domain::value_objects::enums::payment_statuses::PaymentStatus;

    match payment.status {
        PaymentStatus::Completed => notifier.payment_completed(payment).await,
        PaymentStatus::Failed => notifier.payment_failed(payment).await,
        PaymentStatus::Pending => {}
    }
}
