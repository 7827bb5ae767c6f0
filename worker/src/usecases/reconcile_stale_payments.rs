use anyhow::Result;
use chrono::Duration;
use crates::{
    application::{
        payment_notifications::PaymentNotifier, payment_state_machine::PaymentStateMachine,
    },
    domain::{
        clock::Clock,
        entities::payments::PaymentEntity,
        errors::PaymentError,
        repositories::payments::PaymentRepository,
        value_objects::{
            enums::payment_statuses::PaymentStatus, payments::TransitionOutcome,
        },
    },
    payments::gateway::{GatewayRegistry, GatewayStatus},
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

const MAX_REPORTED_IDS: usize = 20;

#[derive(Debug, Clone)]
pub struct ReconcileParams {
    pub stale_after: Duration,
    pub limit: Option<i64>,
    pub gateway_check: Option<GatewayCheck>,
}

/// Best-effort gateway poll before a stale row is failed.
#[derive(Debug, Clone, Copy)]
pub struct GatewayCheck {
    pub max_checks: usize,
    pub timeout: std::time::Duration,
}

/// What a gateway poll established about one stale row.
#[derive(Debug, Clone, PartialEq)]
enum PollVerdict {
    Confirmed { transaction_id: String },
    Declined { reason: String },
    Unconfirmed,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ReconcileResult {
    pub scanned: usize,
    pub failed: usize,
    pub completed_by_gateway: usize,
    pub already_settled: usize,
    pub gateway_checks: usize,
    pub gateway_check_errors: usize,
    pub errors: usize,
    pub failed_ids: Vec<Uuid>,
    pub completed_ids: Vec<Uuid>,
}

/// Moves PENDING rows older than the threshold to a terminal state. A notify
/// that lands first wins; the sweep then counts the row as already settled.
pub struct ReconcileStalePaymentsUseCase {
    repository: Arc<dyn PaymentRepository + Send + Sync>,
    state_machine: PaymentStateMachine,
    gateways: GatewayRegistry,
    notifier: PaymentNotifier,
    clock: Arc<dyn Clock>,
}

impl ReconcileStalePaymentsUseCase {
    pub fn new(
        repository: Arc<dyn PaymentRepository + Send + Sync>,
        state_machine: PaymentStateMachine,
        gateways: GatewayRegistry,
        notifier: PaymentNotifier,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repository,
            state_machine,
            gateways,
            notifier,
            clock,
        }
    }

    pub async fn run(&self, params: &ReconcileParams) -> Result<ReconcileResult> {
        let cutoff = self.clock.now() - params.stale_after;
        let limit = params.limit.filter(|l| *l > 0);

        let stale = self.repository.list_stale_pending(cutoff, limit).await?;

        let mut result = ReconcileResult {
            scanned: stale.len(),
            ..Default::default()
        };

        for payment in stale {
            let payment_id = payment.id;
            let verdict = match params.gateway_check {
                Some(check) if result.gateway_checks < check.max_checks => {
                    result.gateway_checks += 1;
                    self.poll_gateway(&payment, check, &mut result).await
                }
                _ => PollVerdict::Unconfirmed,
            };

            let outcome = match verdict {
                PollVerdict::Confirmed { transaction_id } => {
                    self.state_machine
                        .mark_completed(payment_id, &transaction_id)
                        .await
                }
                PollVerdict::Declined { reason } => {
                    self.state_machine.mark_failed(payment_id, &reason).await
                }
                PollVerdict::Unconfirmed => {
                    let reason = format!(
                        "No gateway confirmation within {} minutes",
                        params.stale_after.num_minutes()
                    );
                    self.state_machine.mark_failed(payment_id, &reason).await
                }
            };

            match outcome {
                Ok(TransitionOutcome::Applied(settled)) => {
                    match settled.status {
                        PaymentStatus::Completed => {
                            result.completed_by_gateway += 1;
                            push_capped(&mut result.completed_ids, payment_id);
                            self.notifier.payment_completed(&settled).await;
                        }
                        _ => {
                            result.failed += 1;
                            push_capped(&mut result.failed_ids, payment_id);
                            self.notifier.payment_failed(&settled).await;
                        }
                    }
                }
                Ok(TransitionOutcome::Replayed(_)) | Err(PaymentError::InvalidState { .. }) => {
                    info!(%payment_id, "reconcile_payments: payment settled concurrently; skipping");
                    result.already_settled += 1;
                }
                Err(err) => {
                    error!(%payment_id, error = %err, "reconcile_payments: failed to settle payment");
                    result.errors += 1;
                }
            }
        }

        info!(
            scanned = result.scanned,
            failed = result.failed,
            completed_by_gateway = result.completed_by_gateway,
            already_settled = result.already_settled,
            gateway_checks = result.gateway_checks,
            gateway_check_errors = result.gateway_check_errors,
            errors = result.errors,
            "reconcile_payments: completed"
        );

        Ok(result)
    }

    /// Silence, errors and untrusted replies all come back `Unconfirmed`, which
    /// leaves the row to be failed with the generic reason.
    async fn poll_gateway(
        &self,
        payment: &PaymentEntity,
        check: GatewayCheck,
        result: &mut ReconcileResult,
    ) -> PollVerdict {
        let payment_id = payment.id;
        let Some((gateway, client)) = payment
            .method
            .gateway()
            .and_then(|gateway| self.gateways.get(gateway).map(|client| (gateway, client)))
        else {
            return PollVerdict::Unconfirmed;
        };

        match tokio::time::timeout(check.timeout, client.query_status(payment)).await {
            Ok(Ok(GatewayStatus::Succeeded { transaction_id })) => {
                PollVerdict::Confirmed { transaction_id }
            }
            Ok(Ok(GatewayStatus::Failed { code, message })) => {
                info!(%payment_id, %gateway, %code, "reconcile_payments: gateway reports payment failed");
                PollVerdict::Declined {
                    reason: format!("{gateway} {code}: {message}"),
                }
            }
            Ok(Ok(GatewayStatus::Pending)) => {
                info!(%payment_id, %gateway, "reconcile_payments: gateway did not confirm payment");
                PollVerdict::Unconfirmed
            }
            Ok(Ok(GatewayStatus::Unknown { reason })) => {
                warn!(%payment_id, %gateway, %reason, "reconcile_payments: gateway reply not trusted");
                result.gateway_check_errors += 1;
                PollVerdict::Unconfirmed
            }
            Ok(Err(err)) => {
                warn!(%payment_id, gateway_error = %err, "reconcile_payments: gateway check failed");
                result.gateway_check_errors += 1;
                PollVerdict::Unconfirmed
            }
            Err(_) => {
                warn!(%payment_id, "reconcile_payments: gateway check timed out");
                result.gateway_check_errors += 1;
                PollVerdict::Unconfirmed
            }
        }
    }
}

fn push_capped(ids: &mut Vec<Uuid>, id: Uuid) {
    if ids.len() < MAX_REPORTED_IDS {
        ids.push(id);
    }
}
