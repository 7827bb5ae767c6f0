use std::{collections::BTreeMap, time::Duration};

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use rust_decimal::{Decimal, prelude::ToPrimitive};
use serde_json::{Value, json};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{
    config::MoMoConfig,
    gateway::{ChargeRequest, GatewayCheckout, GatewayNotification, GatewayStatus, PaymentGateway},
    signer::{GatewaySigner, MOMO_SIGNATURE_FIELD, SignedMessage},
};
use crate::domain::{
    entities::payments::PaymentEntity, errors::GatewayError,
    value_objects::enums::gateways::Gateway,
};

pub const MOMO_SUCCESS: i64 = 0;
/// Result codes that mean the payer has not finished yet.
pub const MOMO_PENDING_CODES: &[i64] = &[1000, 7000, 7002, 9000];

/// Protocol B client built on reqwest. Creation is a signed server-to-server call.
pub struct MoMoClient {
    http: reqwest::Client,
    config: MoMoConfig,
    signer: GatewaySigner,
}

impl MoMoClient {
    pub fn new(config: MoMoConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let signer = GatewaySigner::momo(config.secret_key.clone(), config.access_key.clone());

        Ok(Self {
            http,
            config,
            signer,
        })
    }

    pub fn signer(&self) -> &GatewaySigner {
        &self.signer
    }

    async fn ensure_success(
        resp: reqwest::Response,
        context: &str,
    ) -> Result<reqwest::Response, GatewayError> {
        if resp.status().is_success() {
            return Ok(resp);
        }

        let status = resp.status();
        let body = match resp.text().await {
            Ok(text) if !text.is_empty() => text,
            Ok(_) => "<empty response body>".to_string(),
            Err(err) => format!("<failed to read response body: {err}>"),
        };

        error!(
            status = %status,
            response_body = %body,
            context = %context,
            "momo_client: api request failed"
        );

        Err(GatewayError::Transport(format!(
            "MoMo API request failed: {context} (status {status})"
        )))
    }

    /// Signed create-transaction body. `amount` must already be whole VND.
    pub fn build_create_request(&self, request: &ChargeRequest) -> Result<Value> {
        let amount = whole_vnd(request.amount)?;
        let reference = request.payment_id.to_string();

        let params: BTreeMap<String, String> = [
            ("partnerCode", self.config.partner_code.clone()),
            ("requestId", reference.clone()),
            ("amount", amount.to_string()),
            ("orderId", reference.clone()),
            ("orderInfo", request.order_info.clone()),
            ("redirectUrl", self.config.return_url.clone()),
            ("ipnUrl", self.config.notify_url.clone()),
            ("requestType", self.config.request_type.clone()),
            ("extraData", String::new()),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect();

        let signature = self.signer.sign(&params, SignedMessage::PaymentRequest)?;

        Ok(json!({
            "partnerCode": self.config.partner_code,
            "partnerName": self.config.partner_name,
            "storeId": self.config.store_id,
            "requestId": reference,
            "amount": amount,
            "orderId": reference,
            "orderInfo": request.order_info,
            "redirectUrl": self.config.return_url,
            "ipnUrl": self.config.notify_url,
            "lang": self.config.lang,
            "requestType": self.config.request_type,
            "autoCapture": true,
            "extraData": "",
            MOMO_SIGNATURE_FIELD: signature,
        }))
    }

    pub fn build_query_request(&self, payment_id: Uuid, request_id: Uuid) -> Result<Value> {
        let params: BTreeMap<String, String> = [
            ("partnerCode", self.config.partner_code.clone()),
            ("requestId", request_id.to_string()),
            ("orderId", payment_id.to_string()),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect();

        let signature = self.signer.sign(&params, SignedMessage::StatusQuery)?;

        Ok(json!({
            "partnerCode": self.config.partner_code,
            "requestId": request_id.to_string(),
            "orderId": payment_id.to_string(),
            "lang": self.config.lang,
            MOMO_SIGNATURE_FIELD: signature,
        }))
    }

    async fn post(&self, url: &str, body: &Value, context: &str) -> Result<Value, GatewayError> {
        let resp = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let resp = Self::ensure_success(resp, context).await?;

        resp.json::<Value>()
            .await
            .map_err(|err| GatewayError::InvalidResponse(format!("{context}: {err}")))
    }
}

#[async_trait]
impl PaymentGateway for MoMoClient {
    fn gateway(&self) -> Gateway {
        Gateway::MoMo
    }

    async fn initiate(&self, request: &ChargeRequest) -> Result<GatewayCheckout, GatewayError> {
        let missing = self.config.missing();
        if !missing.is_empty() {
            return Err(GatewayError::Misconfigured(missing.join(", ")));
        }

        let body = self
            .build_create_request(request)
            .map_err(|err| GatewayError::Misconfigured(err.to_string()))?;
        let response = self
            .post(&self.config.create_url, &body, "create transaction")
            .await?;
        let fields = params_from_json(&response);

        let result_code = result_code(&fields)?;
        if result_code != MOMO_SUCCESS {
            let message = fields.get("message").cloned().unwrap_or_default();
            info!(
                payment_id = %request.payment_id,
                result_code,
                %message,
                "momo_client: create transaction rejected"
            );
            return Err(GatewayError::Rejected {
                code: result_code.to_string(),
                message,
            });
        }

        let pay_url = fields
            .get("payUrl")
            .filter(|url| !url.is_empty())
            .cloned()
            .ok_or_else(|| GatewayError::InvalidResponse("payUrl is missing".to_string()))?;

        Ok(GatewayCheckout { pay_url })
    }

    async fn query_status(&self, payment: &PaymentEntity) -> Result<GatewayStatus, GatewayError> {
        let body = self
            .build_query_request(payment.id, Uuid::new_v4())
            .map_err(|err| GatewayError::Misconfigured(err.to_string()))?;
        let response = self
            .post(&self.config.query_url, &body, "query transaction")
            .await?;

        self.interpret_query_reply(payment, &response)
    }
}

impl MoMoClient {
    /// Reads a status-query reply for `payment`. A reply whose signature, order
    /// or amount does not match comes back as `Unknown`.
    pub fn interpret_query_reply(
        &self,
        payment: &PaymentEntity,
        reply: &Value,
    ) -> Result<GatewayStatus, GatewayError> {
        let mut fields = params_from_json(reply);
        let claimed = fields.remove(MOMO_SIGNATURE_FIELD).unwrap_or_default();
        let code = result_code(&fields)?;

        if !self
            .signer
            .verify(&fields, SignedMessage::StatusResponse, &claimed)
        {
            warn!(payment_id = %payment.id, result_code = code, "momo_client: query reply signature mismatch");
            return Ok(GatewayStatus::Unknown {
                reason: "query reply signature mismatch".to_string(),
            });
        }

        let order_id = fields.get("orderId").map(|id| id.trim()).unwrap_or("");
        if order_id != payment.id.to_string() {
            warn!(payment_id = %payment.id, %order_id, "momo_client: query reply for another order");
            return Ok(GatewayStatus::Unknown {
                reason: format!("query reply names order {order_id:?}"),
            });
        }

        let reported = fields
            .get("amount")
            .and_then(|amount| amount.trim().parse::<Decimal>().ok());
        if reported != Some(payment.amount) {
            warn!(
                payment_id = %payment.id,
                expected = %payment.amount,
                reported = ?reported,
                "momo_client: query reply amount mismatch"
            );
            return Ok(GatewayStatus::Unknown {
                reason: "query reply amount mismatch".to_string(),
            });
        }

        Ok(classify_result(
            code,
            fields.get("transId").map(|id| id.trim()).unwrap_or(""),
            fields.get("message").map(String::as_str).unwrap_or(""),
        ))
    }
}

fn map_reqwest_error(error: reqwest::Error) -> GatewayError {
    if error.is_timeout() {
        return GatewayError::Timeout;
    }
    if error.is_connect() {
        return GatewayError::Transport("MoMo connection failed".to_string());
    }
    GatewayError::Transport("MoMo request failed".to_string())
}

fn result_code(fields: &BTreeMap<String, String>) -> Result<i64, GatewayError> {
    fields
        .get("resultCode")
        .and_then(|code| code.trim().parse::<i64>().ok())
        .ok_or_else(|| GatewayError::InvalidResponse("resultCode is missing".to_string()))
}

pub fn classify_result(code: i64, transaction_id: &str, message: &str) -> GatewayStatus {
    if code == MOMO_SUCCESS && !transaction_id.is_empty() {
        return GatewayStatus::Succeeded {
            transaction_id: transaction_id.to_string(),
        };
    }
    if code == MOMO_SUCCESS || MOMO_PENDING_CODES.contains(&code) {
        return GatewayStatus::Pending;
    }
    GatewayStatus::Failed {
        code: code.to_string(),
        message: message.to_string(),
    }
}

fn whole_vnd(amount: Decimal) -> Result<i64> {
    if !amount.fract().is_zero() {
        bail!("MoMo amounts must be whole VND, got {amount}");
    }
    amount
        .to_i64()
        .ok_or_else(|| anyhow!("amount {amount} is out of range"))
}

/// Flattens a JSON object into signable text: numbers and booleans keep their
/// literal text, `null` becomes empty.
pub fn params_from_json(value: &Value) -> BTreeMap<String, String> {
    let Some(object) = value.as_object() else {
        return BTreeMap::new();
    };

    object
        .iter()
        .map(|(key, value)| {
            let text = match value {
                Value::Null => String::new(),
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            (key.clone(), text)
        })
        .collect()
}

pub fn parse_notification(params: &BTreeMap<String, String>) -> Result<GatewayNotification> {
    let order_id = params.get("orderId").map(String::as_str).unwrap_or("");
    let payment_id = Uuid::parse_str(order_id.trim())
        .with_context(|| format!("orderId {order_id:?} is not a payment id"))?;
    let amount: Decimal = params
        .get("amount")
        .map(|amount| amount.trim())
        .unwrap_or("")
        .parse()
        .context("amount is not a number")?;
    let code: i64 = params
        .get("resultCode")
        .map(|code| code.trim())
        .unwrap_or("")
        .parse()
        .context("resultCode is not a number")?;
    let message = params.get("message").cloned().unwrap_or_default();
    let transaction_id = params.get("transId").map(String::as_str).unwrap_or("");

    if code == MOMO_SUCCESS && transaction_id.trim().is_empty() {
        bail!("successful notification without transId");
    }

    Ok(GatewayNotification {
        payment_id,
        amount,
        status: classify_result(code, transaction_id.trim(), &message),
        message,
    })
}
