use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::automock;
use rust_decimal::Decimal;
use uuid::Uuid;

use super::{momo_client, vnpay_client};
use crate::domain::{
    entities::payments::PaymentEntity, errors::GatewayError,
    value_objects::enums::gateways::Gateway,
};

/// What a gateway needs to open a checkout for one ledger row.
#[derive(Debug, Clone, PartialEq)]
pub struct ChargeRequest {
    pub payment_id: Uuid,
    pub amount: Decimal,
    pub order_info: String,
    pub client_ip: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayCheckout {
    /// Where the payer is sent next.
    pub pay_url: String,
}

/// Gateway's view of a payment, as reported by a notification or a status query.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayStatus {
    Succeeded { transaction_id: String },
    Failed { code: String, message: String },
    Pending,
    /// The reply could not be trusted (bad signature, wrong amount). Callers
    /// must not settle anything on it.
    Unknown { reason: String },
}

/// A verified notification reduced to what the ledger cares about.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayNotification {
    pub payment_id: Uuid,
    pub amount: Decimal,
    pub status: GatewayStatus,
    pub message: String,
}

/// Reads a verified notification (signature fields already stripped).
pub fn parse_notification(
    gateway: Gateway,
    params: &BTreeMap<String, String>,
) -> anyhow::Result<GatewayNotification> {
    match gateway {
        Gateway::VnPay => vnpay_client::parse_notification(params),
        Gateway::MoMo => momo_client::parse_notification(params),
    }
}

#[automock]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn gateway(&self) -> Gateway;

    /// Builds or requests the payer-facing checkout. Never touches the ledger.
    async fn initiate(&self, request: &ChargeRequest) -> Result<GatewayCheckout, GatewayError>;

    /// Best-effort status lookup. Transport problems are errors, not failures.
    async fn query_status(&self, payment: &PaymentEntity) -> Result<GatewayStatus, GatewayError>;
}

/// Gateway clients by tag, so callers never match on the gateway themselves.
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    gateways: HashMap<Gateway, Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, client: Arc<dyn PaymentGateway>) -> Self {
        self.gateways.insert(client.gateway(), client);
        self
    }

    pub fn get(&self, gateway: Gateway) -> Option<Arc<dyn PaymentGateway>> {
        self.gateways.get(&gateway).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_resolves_by_gateway_tag() {
        let mut momo = MockPaymentGateway::new();
        momo.expect_gateway().return_const(Gateway::MoMo);

        let registry = GatewayRegistry::new().with(Arc::new(momo));

        assert!(registry.get(Gateway::MoMo).is_some());
        assert!(registry.get(Gateway::VnPay).is_none());
    }
}
