use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use crates::{
    application::{
        payment_notifications::PaymentNotifier, payment_state_machine::PaymentStateMachine,
    },
    domain::{
        entities::payments::PaymentEntity,
        errors::PaymentError,
        repositories::payments::PaymentRepository,
        value_objects::{enums::gateways::Gateway, payments::TransitionOutcome},
    },
    observability::ANOMALY_TARGET,
    payments::{
        gateway::{self, GatewayStatus},
        verifier::CallbackVerifier,
    },
};
use serde_json::{Value, json};
use tokio::{sync::Mutex, task::JoinSet};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::payments::notify_applied;

/// How a notify call was resolved; each gateway renders its own acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    Accepted,
    InvalidSignature,
    Malformed,
    UnknownPayment,
    AmountMismatch,
    InconsistentState,
    Internal,
}

impl NotifyOutcome {
    /// `{ RspCode, Message }` acknowledgement for the sorted-HMAC gateway.
    pub fn vnpay_ack(&self) -> Value {
        let (code, message) = match self {
            NotifyOutcome::Accepted => ("00", "Confirm Success"),
            NotifyOutcome::UnknownPayment => ("01", "Order not found"),
            NotifyOutcome::InconsistentState => ("02", "Order already confirmed"),
            NotifyOutcome::AmountMismatch => ("04", "Invalid amount"),
            NotifyOutcome::InvalidSignature => ("97", "Invalid signature"),
            NotifyOutcome::Malformed | NotifyOutcome::Internal => ("99", "Unknown error"),
        };
        json!({ "RspCode": code, "Message": message })
    }

    /// Acknowledgement for the fixed-order gateway, echoing its identifiers.
    pub fn momo_ack(&self, params: &BTreeMap<String, String>) -> Value {
        let (code, message) = match self {
            NotifyOutcome::Accepted => (0, "Success"),
            NotifyOutcome::InvalidSignature => (97, "Invalid signature"),
            NotifyOutcome::UnknownPayment => (42, "Order not found"),
            NotifyOutcome::InconsistentState => (2, "Order already settled"),
            NotifyOutcome::AmountMismatch => (4, "Invalid amount"),
            NotifyOutcome::Malformed | NotifyOutcome::Internal => (1, "Rejected"),
        };
        let echo = |key: &str| params.get(key).cloned().unwrap_or_default();
        json!({
            "partnerCode": echo("partnerCode"),
            "orderId": echo("orderId"),
            "requestId": echo("requestId"),
            "resultCode": code,
            "message": message,
        })
    }
}

/// What the browser return path may show. Carries no authority.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentReturnView {
    pub success: bool,
    pub payment_id: Option<Uuid>,
    pub message: String,
}

pub struct PaymentCallbackUseCase {
    repository: Arc<dyn PaymentRepository + Send + Sync>,
    state_machine: PaymentStateMachine,
    notifier: PaymentNotifier,
    verifiers: HashMap<Gateway, CallbackVerifier>,
    /// Payer messages still in flight. The gateway ack never waits on them.
    deliveries: Mutex<JoinSet<()>>,
}

impl PaymentCallbackUseCase {
    pub fn new(
        repository: Arc<dyn PaymentRepository + Send + Sync>,
        state_machine: PaymentStateMachine,
        notifier: PaymentNotifier,
        verifiers: impl IntoIterator<Item = CallbackVerifier>,
    ) -> Self {
        let verifiers = verifiers
            .into_iter()
            .map(|verifier| (verifier.signer().gateway(), verifier))
            .collect();
        Self {
            repository,
            state_machine,
            notifier,
            verifiers,
            deliveries: Mutex::new(JoinSet::new()),
        }
    }

    /// Waits for every payer message spawned so far.
    pub async fn drain_notifications(&self) {
        let mut pending = std::mem::take(&mut *self.deliveries.lock().await);
        while let Some(joined) = pending.join_next().await {
            if let Err(err) = joined {
                warn!(error = %err, "payment_callbacks: payer notification task aborted");
            }
        }
    }

    async fn spawn_notification(&self, payment: PaymentEntity) {
        let notifier = self.notifier.clone();
        let mut deliveries = self.deliveries.lock().await;
        while deliveries.try_join_next().is_some() {}
        deliveries.spawn(async move { notify_applied(&notifier, &payment).await });
    }

    /// Authoritative server-to-server notification. Only a verified message
    /// reaches the state machine; replays of an applied outcome are accepted.
    pub async fn handle_notify(
        &self,
        gateway: Gateway,
        raw: BTreeMap<String, String>,
    ) -> NotifyOutcome {
        let Some(verifier) = self.verifiers.get(&gateway) else {
            error!(%gateway, "payment_callbacks: no verifier configured");
            return NotifyOutcome::Internal;
        };

        let callback = verifier.verify(raw);
        if !callback.verified {
            warn!(
                %gateway,
                order = callback.params.get(order_field(gateway)).map(String::as_str).unwrap_or(""),
                "payment_callbacks: notify rejected, signature mismatch"
            );
            return NotifyOutcome::InvalidSignature;
        }

        let notification = match gateway::parse_notification(gateway, &callback.params) {
            Ok(notification) => notification,
            Err(err) => {
                warn!(%gateway, error = %err, "payment_callbacks: malformed notify");
                return NotifyOutcome::Malformed;
            }
        };
        let payment_id = notification.payment_id;
        info!(%gateway, %payment_id, status = ?notification.status, "payment_callbacks: notify verified");

        let payment = match self.repository.find_by_id(payment_id).await {
            Ok(Some(payment)) => payment,
            Ok(None) => {
                warn!(%gateway, %payment_id, "payment_callbacks: notify for unknown payment");
                return NotifyOutcome::UnknownPayment;
            }
            Err(err) => {
                error!(%gateway, %payment_id, db_error = ?err, "payment_callbacks: failed to load payment");
                return NotifyOutcome::Internal;
            }
        };

        if payment.method != gateway.payment_method() || payment.is_refund() {
            error!(
                target: ANOMALY_TARGET,
                %gateway,
                %payment_id,
                method = %payment.method,
                "payment_callbacks: notify for a payment owned by another method"
            );
            return NotifyOutcome::UnknownPayment;
        }

        if notification.amount != payment.amount {
            error!(
                target: ANOMALY_TARGET,
                %gateway,
                %payment_id,
                expected = %payment.amount,
                reported = %notification.amount,
                "payment_callbacks: notify amount mismatch"
            );
            return NotifyOutcome::AmountMismatch;
        }

        let result = match &notification.status {
            GatewayStatus::Succeeded { transaction_id } => {
                self.state_machine
                    .mark_completed(payment_id, transaction_id)
                    .await
            }
            GatewayStatus::Failed { code, message } => {
                self.state_machine
                    .mark_failed(payment_id, &format!("{gateway} {code}: {message}"))
                    .await
            }
            GatewayStatus::Pending => {
                info!(%gateway, %payment_id, "payment_callbacks: gateway reports payment in progress");
                return NotifyOutcome::Accepted;
            }
            GatewayStatus::Unknown { reason } => {
                warn!(%gateway, %payment_id, %reason, "payment_callbacks: notify status unreadable");
                return NotifyOutcome::Malformed;
            }
        };

        match result {
            Ok(TransitionOutcome::Applied(payment)) => {
                self.spawn_notification(payment).await;
                NotifyOutcome::Accepted
            }
            Ok(TransitionOutcome::Replayed(_)) => {
                info!(%gateway, %payment_id, "payment_callbacks: notify replay acknowledged");
                NotifyOutcome::Accepted
            }
            Err(err @ PaymentError::InvalidState { .. }) => {
                error!(
                    target: ANOMALY_TARGET,
                    %gateway,
                    %payment_id,
                    error = %err,
                    "payment_callbacks: notify contradicts settled payment"
                );
                NotifyOutcome::InconsistentState
            }
            Err(PaymentError::NotFound(_)) => NotifyOutcome::UnknownPayment,
            Err(err) => {
                error!(%gateway, %payment_id, error = %err, "payment_callbacks: notify failed");
                NotifyOutcome::Internal
            }
        }
    }

    /// Browser return. Verifies for display integrity and never writes.
    pub fn handle_return(
        &self,
        gateway: Gateway,
        raw: BTreeMap<String, String>,
    ) -> PaymentReturnView {
        let Some(verifier) = self.verifiers.get(&gateway) else {
            return PaymentReturnView {
                success: false,
                payment_id: None,
                message: "Payment gateway is not available".to_string(),
            };
        };

        let callback = verifier.verify(raw);
        if !callback.verified {
            warn!(%gateway, "payment_callbacks: return rejected, signature mismatch");
            return PaymentReturnView {
                success: false,
                payment_id: None,
                message: "Invalid payment signature".to_string(),
            };
        }

        match gateway::parse_notification(gateway, &callback.params) {
            Ok(notification) => {
                info!(%gateway, payment_id = %notification.payment_id, "payment_callbacks: return verified");
                PaymentReturnView {
                    success: matches!(notification.status, GatewayStatus::Succeeded { .. }),
                    payment_id: Some(notification.payment_id),
                    message: notification.message,
                }
            }
            Err(err) => {
                warn!(%gateway, error = %err, "payment_callbacks: malformed return");
                PaymentReturnView {
                    success: false,
                    payment_id: None,
                    message: "Malformed payment response".to_string(),
                }
            }
        }
    }
}

fn order_field(gateway: Gateway) -> &'static str {
    match gateway {
        Gateway::VnPay => "vnp_TxnRef",
        Gateway::MoMo => "orderId",
    }
}
