use std::collections::BTreeMap;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, Utc};
use rust_decimal::{Decimal, prelude::ToPrimitive};
use uuid::Uuid;

use super::{
    config::VnPayConfig,
    gateway::{ChargeRequest, GatewayCheckout, GatewayNotification, GatewayStatus, PaymentGateway},
    signer::{GatewaySigner, SignedMessage, VNPAY_SIGNATURE_FIELD},
};
use crate::domain::{
    entities::payments::PaymentEntity, errors::GatewayError,
    value_objects::enums::gateways::Gateway,
};

const VNPAY_SUCCESS: &str = "00";
const VNPAY_TIMEZONE_OFFSET_SECS: i32 = 7 * 3600;

/// Protocol A client. Payment creation is pure URL construction.
pub struct VnPayClient {
    config: VnPayConfig,
    signer: GatewaySigner,
}

impl VnPayClient {
    pub fn new(config: VnPayConfig) -> Self {
        let signer = GatewaySigner::vnpay(config.secret_key.clone());
        Self { config, signer }
    }

    pub fn signer(&self) -> &GatewaySigner {
        &self.signer
    }

    pub fn build_payment_url(&self, request: &ChargeRequest) -> Result<String> {
        let created_at = format_gateway_time(request.created_at)?;
        let expire_at =
            format_gateway_time(request.created_at + Duration::minutes(self.config.expire_minutes))?;

        let params: BTreeMap<String, String> = [
            ("vnp_Version", self.config.version.clone()),
            ("vnp_Command", self.config.command.clone()),
            ("vnp_TmnCode", self.config.tmn_code.clone()),
            ("vnp_Amount", to_minor_units(request.amount)?.to_string()),
            ("vnp_CurrCode", "VND".to_string()),
            ("vnp_TxnRef", request.payment_id.to_string()),
            ("vnp_OrderInfo", request.order_info.clone()),
            ("vnp_OrderType", self.config.order_type.clone()),
            ("vnp_Locale", self.config.locale.clone()),
            ("vnp_ReturnUrl", self.config.return_url.clone()),
            ("vnp_IpAddr", request.client_ip.clone()),
            ("vnp_CreateDate", created_at),
            ("vnp_ExpireDate", expire_at),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect();

        let signature = self.signer.sign(&params, SignedMessage::PaymentRequest)?;
        let query = self
            .signer
            .canonicalize(&params, SignedMessage::PaymentRequest);

        Ok(format!(
            "{}?{}&{}={}",
            self.config.pay_url, query, VNPAY_SIGNATURE_FIELD, signature
        ))
    }
}

#[async_trait]
impl PaymentGateway for VnPayClient {
    fn gateway(&self) -> Gateway {
        Gateway::VnPay
    }

    async fn initiate(&self, request: &ChargeRequest) -> Result<GatewayCheckout, GatewayError> {
        let missing = self.config.missing();
        if !missing.is_empty() {
            return Err(GatewayError::Misconfigured(missing.join(", ")));
        }

        let pay_url = self
            .build_payment_url(request)
            .map_err(|err| GatewayError::Misconfigured(err.to_string()))?;
        Ok(GatewayCheckout { pay_url })
    }

    async fn query_status(&self, payment: &PaymentEntity) -> Result<GatewayStatus, GatewayError> {
        Err(GatewayError::Unsupported(format!(
            "vnpay status query is not available for payment {}",
            payment.id
        )))
    }
}

/// `amount × 100` as an integer, the unit the gateway expects.
pub fn to_minor_units(amount: Decimal) -> Result<i64> {
    (amount * Decimal::ONE_HUNDRED)
        .round()
        .to_i64()
        .ok_or_else(|| anyhow!("amount {amount} is out of range"))
}

pub fn from_minor_units(value: &str) -> Result<Decimal> {
    let minor: i64 = value
        .trim()
        .parse()
        .with_context(|| format!("vnp_Amount {value:?} is not an integer"))?;
    Ok(Decimal::new(minor, 2))
}

/// `yyyyMMddHHmmss` in the gateway's local time (UTC+7).
pub fn format_gateway_time(at: DateTime<Utc>) -> Result<String> {
    let offset = FixedOffset::east_opt(VNPAY_TIMEZONE_OFFSET_SECS)
        .ok_or_else(|| anyhow!("invalid gateway timezone offset"))?;
    Ok(at.with_timezone(&offset).format("%Y%m%d%H%M%S").to_string())
}

fn field<'a>(params: &'a BTreeMap<String, String>, key: &str) -> &'a str {
    params.get(key).map(|value| value.trim()).unwrap_or("")
}

pub fn parse_notification(params: &BTreeMap<String, String>) -> Result<GatewayNotification> {
    let payment_id = Uuid::parse_str(field(params, "vnp_TxnRef"))
        .with_context(|| format!("vnp_TxnRef {:?} is not a payment id", field(params, "vnp_TxnRef")))?;
    let amount = from_minor_units(field(params, "vnp_Amount"))?;
    let response_code = field(params, "vnp_ResponseCode");
    let transaction_status = params.get("vnp_TransactionStatus").map(|value| value.trim());

    let succeeded = response_code == VNPAY_SUCCESS
        && transaction_status.is_none_or(|status| status == VNPAY_SUCCESS);

    let status = if succeeded {
        let transaction_id = field(params, "vnp_TransactionNo");
        if transaction_id.is_empty() {
            return Err(anyhow!("successful notification without vnp_TransactionNo"));
        }
        GatewayStatus::Succeeded {
            transaction_id: transaction_id.to_string(),
        }
    } else {
        let code = if response_code != VNPAY_SUCCESS {
            response_code
        } else {
            transaction_status.unwrap_or(response_code)
        };
        GatewayStatus::Failed {
            code: code.to_string(),
            message: describe_response_code(code).to_string(),
        }
    };

    Ok(GatewayNotification {
        payment_id,
        amount,
        message: match &status {
            GatewayStatus::Failed { message, .. } => message.clone(),
            _ => describe_response_code(VNPAY_SUCCESS).to_string(),
        },
        status,
    })
}

pub fn describe_response_code(code: &str) -> &'static str {
    match code {
        "00" => "Transaction successful",
        "07" => "Transaction deducted but flagged as suspicious",
        "09" => "Card or account is not registered for internet banking",
        "10" => "Card or account verification failed too many times",
        "11" => "Payment window expired",
        "12" => "Card or account is locked",
        "13" => "Wrong one-time password",
        "24" => "Transaction cancelled by the customer",
        "51" => "Insufficient balance",
        "65" => "Daily transaction limit exceeded",
        "75" => "Bank is under maintenance",
        "79" => "Wrong payment password too many times",
        _ => "Transaction failed",
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::payments::verifier::CallbackVerifier;

    fn config() -> VnPayConfig {
        VnPayConfig {
            pay_url: "https://sandbox.vnpayment.vn/paymentv2/vpcpay.html".into(),
            return_url: "https://clinic.example/api/v1/payments/vnpay/return".into(),
            tmn_code: "DEMO1234".into(),
            secret_key: "VNPAYSECRET".into(),
            version: "2.1.0".into(),
            command: "pay".into(),
            order_type: "other".into(),
            locale: "vn".into(),
            expire_minutes: 15,
        }
    }

    fn request() -> ChargeRequest {
        ChargeRequest {
            payment_id: Uuid::parse_str("7f9c2f0e-4a57-4d5e-9a59-2a1c3f0b6d11").unwrap(),
            amount: dec!(500000),
            order_info: "Thanh toan lich hen".into(),
            client_ip: "10.0.0.7".into(),
            created_at: Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap(),
        }
    }

    fn query_params(url: &str) -> BTreeMap<String, String> {
        let parsed = url::Url::parse(url).unwrap();
        parsed.query_pairs().into_owned().collect()
    }

    #[test]
    fn payment_url_carries_minor_units_local_time_and_a_valid_hash() {
        let client = VnPayClient::new(config());
        let url = client.build_payment_url(&request()).unwrap();
        assert!(url.starts_with("https://sandbox.vnpayment.vn/paymentv2/vpcpay.html?"));

        let params = query_params(&url);
        assert_eq!(params["vnp_Amount"], "50000000");
        assert_eq!(params["vnp_CreateDate"], "20250301160000");
        assert_eq!(params["vnp_ExpireDate"], "20250301161500");
        assert_eq!(params["vnp_TxnRef"], "7f9c2f0e-4a57-4d5e-9a59-2a1c3f0b6d11");
        assert_eq!(params["vnp_OrderInfo"], "Thanh toan lich hen");

        let verifier = CallbackVerifier::new(client.signer().clone());
        assert!(verifier.verify(params).verified);
    }

    #[tokio::test]
    async fn initiate_reports_missing_settings() {
        let mut incomplete = config();
        incomplete.secret_key.clear();
        let client = VnPayClient::new(incomplete);

        let err = client.initiate(&request()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Misconfigured(ref keys) if keys.contains("VNPAY_SECRET_KEY")));
    }

    #[test]
    fn notification_success_requires_both_codes() {
        let mut params: BTreeMap<String, String> = [
            ("vnp_TxnRef", "7f9c2f0e-4a57-4d5e-9a59-2a1c3f0b6d11"),
            ("vnp_Amount", "50000000"),
            ("vnp_ResponseCode", "00"),
            ("vnp_TransactionStatus", "00"),
            ("vnp_TransactionNo", "14123456"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let notification = parse_notification(&params).unwrap();
        assert_eq!(notification.amount, dec!(500000));
        assert_eq!(
            notification.status,
            GatewayStatus::Succeeded {
                transaction_id: "14123456".into()
            }
        );

        params.insert("vnp_TransactionStatus".into(), "02".into());
        assert!(matches!(
            parse_notification(&params).unwrap().status,
            GatewayStatus::Failed { ref code, .. } if code == "02"
        ));

        params.remove("vnp_TransactionStatus");
        params.insert("vnp_ResponseCode".into(), "24".into());
        assert_eq!(
            parse_notification(&params).unwrap().status,
            GatewayStatus::Failed {
                code: "24".into(),
                message: "Transaction cancelled by the customer".into()
            }
        );
    }

    #[test]
    fn notification_with_foreign_reference_is_rejected() {
        let params: BTreeMap<String, String> = [("vnp_TxnRef", "ORDER-1"), ("vnp_Amount", "100")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert!(parse_notification(&params).is_err());
    }
}
