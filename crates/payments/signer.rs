use std::collections::BTreeMap;

use anyhow::{Result, bail};
use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha512};
use url::form_urlencoded::byte_serialize;

use crate::domain::value_objects::enums::gateways::Gateway;

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

pub const VNPAY_SIGNATURE_FIELD: &str = "vnp_SecureHash";
pub const VNPAY_SIGNATURE_TYPE_FIELD: &str = "vnp_SecureHashType";
pub const MOMO_SIGNATURE_FIELD: &str = "signature";

const MOMO_PAYMENT_REQUEST_FIELDS: &[&str] = &[
    "accessKey",
    "amount",
    "extraData",
    "ipnUrl",
    "orderId",
    "orderInfo",
    "partnerCode",
    "redirectUrl",
    "requestId",
    "requestType",
];

const MOMO_STATUS_QUERY_FIELDS: &[&str] = &["accessKey", "orderId", "partnerCode", "requestId"];

const MOMO_NOTIFICATION_FIELDS: &[&str] = &[
    "accessKey",
    "amount",
    "extraData",
    "message",
    "orderId",
    "orderInfo",
    "orderType",
    "partnerCode",
    "payType",
    "requestId",
    "responseTime",
    "resultCode",
    "transId",
];

/// Which signed message is being built or checked. Only the fixed-order
/// protocol cares; the sorted protocol signs every field it is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignedMessage {
    PaymentRequest,
    StatusQuery,
    /// Reply to a status query. Signed over the same fields as a notification.
    StatusResponse,
    Notification,
}

/// Signing capability for one gateway. Business code holds a `GatewaySigner`
/// and never branches on the gateway to sign or verify.
#[derive(Clone)]
pub enum GatewaySigner {
    /// Sorted keys, form-encoded pairs, empty values dropped, HMAC-SHA512.
    VnPay { secret_key: String },
    /// Fixed field order, raw values, missing values as `k=`, HMAC-SHA256.
    MoMo {
        secret_key: String,
        access_key: String,
    },
}

impl std::fmt::Debug for GatewaySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewaySigner")
            .field("gateway", &self.gateway())
            .finish_non_exhaustive()
    }
}

impl GatewaySigner {
    pub fn vnpay(secret_key: impl Into<String>) -> Self {
        GatewaySigner::VnPay {
            secret_key: secret_key.into(),
        }
    }

    pub fn momo(secret_key: impl Into<String>, access_key: impl Into<String>) -> Self {
        GatewaySigner::MoMo {
            secret_key: secret_key.into(),
            access_key: access_key.into(),
        }
    }

    pub fn gateway(&self) -> Gateway {
        match self {
            GatewaySigner::VnPay { .. } => Gateway::VnPay,
            GatewaySigner::MoMo { .. } => Gateway::MoMo,
        }
    }

    pub fn signature_field(&self) -> &'static str {
        match self {
            GatewaySigner::VnPay { .. } => VNPAY_SIGNATURE_FIELD,
            GatewaySigner::MoMo { .. } => MOMO_SIGNATURE_FIELD,
        }
    }

    /// Fields that never take part in the hash input.
    pub fn is_signature_field(&self, key: &str) -> bool {
        match self {
            GatewaySigner::VnPay { .. } => {
                key == VNPAY_SIGNATURE_FIELD || key == VNPAY_SIGNATURE_TYPE_FIELD
            }
            GatewaySigner::MoMo { .. } => key == MOMO_SIGNATURE_FIELD,
        }
    }

    fn secret_key(&self) -> &str {
        match self {
            GatewaySigner::VnPay { secret_key } | GatewaySigner::MoMo { secret_key, .. } => {
                secret_key
            }
        }
    }

    pub fn canonicalize(&self, params: &BTreeMap<String, String>, message: SignedMessage) -> String {
        match self {
            GatewaySigner::VnPay { .. } => params
                .iter()
                .filter(|(key, value)| !value.is_empty() && !self.is_signature_field(key))
                .map(|(key, value)| format!("{}={}", form_encode(key), form_encode(value)))
                .collect::<Vec<_>>()
                .join("&"),
            GatewaySigner::MoMo { access_key, .. } => {
                let fields = match message {
                    SignedMessage::PaymentRequest => MOMO_PAYMENT_REQUEST_FIELDS,
                    SignedMessage::StatusQuery => MOMO_STATUS_QUERY_FIELDS,
                    SignedMessage::StatusResponse | SignedMessage::Notification => {
                        MOMO_NOTIFICATION_FIELDS
                    }
                };
                fields
                    .iter()
                    .map(|field| {
                        let value = if *field == "accessKey" {
                            access_key.as_str()
                        } else {
                            params.get(*field).map(String::as_str).unwrap_or("")
                        };
                        format!("{field}={value}")
                    })
                    .collect::<Vec<_>>()
                    .join("&")
            }
        }
    }

    /// Lowercase hex HMAC over the canonical string.
    pub fn sign(&self, params: &BTreeMap<String, String>, message: SignedMessage) -> Result<String> {
        let data = self.canonicalize(params, message);
        let digest = self.mac(data.as_bytes())?;
        Ok(hex::encode(digest))
    }

    /// Constant-time check of a claimed hex signature, case-insensitive.
    /// Any decoding problem or a missing secret counts as a mismatch.
    pub fn verify(
        &self,
        params: &BTreeMap<String, String>,
        message: SignedMessage,
        claimed: &str,
    ) -> bool {
        let Ok(claimed) = hex::decode(claimed.trim()) else {
            return false;
        };
        if claimed.is_empty() || self.secret_key().is_empty() {
            return false;
        }

        let data = self.canonicalize(params, message);
        match self {
            GatewaySigner::VnPay { secret_key } => HmacSha512::new_from_slice(secret_key.as_bytes())
                .map(|mut mac| {
                    mac.update(data.as_bytes());
                    mac.verify_slice(&claimed).is_ok()
                })
                .unwrap_or(false),
            GatewaySigner::MoMo { secret_key, .. } => {
                HmacSha256::new_from_slice(secret_key.as_bytes())
                    .map(|mut mac| {
                        mac.update(data.as_bytes());
                        mac.verify_slice(&claimed).is_ok()
                    })
                    .unwrap_or(false)
            }
        }
    }

    fn mac(&self, data: &[u8]) -> Result<Vec<u8>> {
        if self.secret_key().is_empty() {
            bail!("{} secret key is not configured", self.gateway());
        }

        let digest = match self {
            GatewaySigner::VnPay { secret_key } => {
                let mut mac = HmacSha512::new_from_slice(secret_key.as_bytes())?;
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
            GatewaySigner::MoMo { secret_key, .. } => {
                let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())?;
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
        };
        Ok(digest)
    }
}

/// `application/x-www-form-urlencoded` byte encoding: space becomes `+`,
/// only `A-Za-z0-9*-._` stay literal.
pub fn form_encode(value: &str) -> String {
    byte_serialize(value.as_bytes()).collect()
}

/// Constant-time comparison of a presented bearer token against the
/// configured one. Both sides are MACed first so their lengths never leak.
/// An empty configured token matches nothing.
pub fn tokens_match(presented: &str, expected: &str) -> bool {
    const KEY: &[u8] = b"bearer-token-compare";

    if expected.is_empty() {
        return false;
    }
    let (Ok(mut expected_mac), Ok(mut presented_mac)) = (
        HmacSha256::new_from_slice(KEY),
        HmacSha256::new_from_slice(KEY),
    ) else {
        return false;
    };
    expected_mac.update(expected.as_bytes());
    presented_mac.update(presented.as_bytes());
    presented_mac
        .verify_slice(&expected_mac.finalize().into_bytes())
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_tokens_compare_exactly() {
        assert!(tokens_match("s3cret-admin", "s3cret-admin"));
        assert!(!tokens_match("s3cret-admiN", "s3cret-admin"));
        assert!(!tokens_match("s3cret", "s3cret-admin"));
        assert!(!tokens_match("s3cret-admin-and-more", "s3cret-admin"));
        assert!(!tokens_match("", ""));
    }

    const ORDER_ID: &str = "7f9c2f0e-4a57-4d5e-9a59-2a1c3f0b6d11";

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn vnpay_request() -> BTreeMap<String, String> {
        params(&[
            ("vnp_Version", "2.1.0"),
            ("vnp_Command", "pay"),
            ("vnp_TmnCode", "DEMO1234"),
            ("vnp_Amount", "50000000"),
            ("vnp_CurrCode", "VND"),
            ("vnp_BankCode", ""),
            ("vnp_TxnRef", ORDER_ID),
            ("vnp_OrderInfo", "Thanh toan lich hen 1"),
            ("vnp_OrderType", "other"),
            ("vnp_Locale", "vn"),
            (
                "vnp_ReturnUrl",
                "https://clinic.example/api/v1/payments/vnpay/return",
            ),
            ("vnp_IpAddr", "127.0.0.1"),
            ("vnp_CreateDate", "20250301160000"),
        ])
    }

    fn momo_request() -> BTreeMap<String, String> {
        params(&[
            ("partnerCode", "MOMODEMO"),
            ("requestId", ORDER_ID),
            ("amount", "500000"),
            ("orderId", ORDER_ID),
            ("orderInfo", "Thanh toan lich hen 1"),
            (
                "redirectUrl",
                "https://clinic.example/api/v1/payments/momo/return",
            ),
            (
                "ipnUrl",
                "https://clinic.example/api/v1/payments/momo/notify",
            ),
            ("requestType", "payWithMethod"),
            ("extraData", ""),
            ("lang", "vi"),
        ])
    }

    #[test]
    fn vnpay_canonical_string_is_sorted_encoded_and_skips_empty_values() {
        let signer = GatewaySigner::vnpay("VNPAYSECRET");
        let canonical = signer.canonicalize(&vnpay_request(), SignedMessage::PaymentRequest);

        assert_eq!(
            canonical,
            "vnp_Amount=50000000&vnp_Command=pay&vnp_CreateDate=20250301160000\
             &vnp_CurrCode=VND&vnp_IpAddr=127.0.0.1&vnp_Locale=vn\
             &vnp_OrderInfo=Thanh+toan+lich+hen+1&vnp_OrderType=other\
             &vnp_ReturnUrl=https%3A%2F%2Fclinic.example%2Fapi%2Fv1%2Fpayments%2Fvnpay%2Freturn\
             &vnp_TmnCode=DEMO1234&vnp_TxnRef=7f9c2f0e-4a57-4d5e-9a59-2a1c3f0b6d11\
             &vnp_Version=2.1.0"
        );
        assert!(!canonical.contains("vnp_BankCode"));
    }

    #[test]
    fn vnpay_known_answer() {
        let signer = GatewaySigner::vnpay("VNPAYSECRET");
        let signature = signer
            .sign(&vnpay_request(), SignedMessage::PaymentRequest)
            .unwrap();

        assert_eq!(
            signature,
            "be7ddcf4c85a431301c1bf620309dae4ca3272a6699ae940229de788ac1aadb9\
             55ef708d7d3427d3d09ebe7587de6a6bb0587e89bdf00234a5bf79bb90535ee8"
        );
    }

    #[test]
    fn vnpay_ignores_hash_fields_in_input() {
        let signer = GatewaySigner::vnpay("VNPAYSECRET");
        let mut with_hash = vnpay_request();
        with_hash.insert(VNPAY_SIGNATURE_FIELD.into(), "abc".into());
        with_hash.insert(VNPAY_SIGNATURE_TYPE_FIELD.into(), "HmacSHA512".into());

        assert_eq!(
            signer.canonicalize(&with_hash, SignedMessage::Notification),
            signer.canonicalize(&vnpay_request(), SignedMessage::Notification)
        );
    }

    #[test]
    fn momo_canonical_string_uses_fixed_order_and_empty_placeholders() {
        let signer = GatewaySigner::momo("MOMOSECRET", "DEMOACCESS");
        let canonical = signer.canonicalize(&momo_request(), SignedMessage::PaymentRequest);

        assert_eq!(
            canonical,
            "accessKey=DEMOACCESS&amount=500000&extraData=\
             &ipnUrl=https://clinic.example/api/v1/payments/momo/notify\
             &orderId=7f9c2f0e-4a57-4d5e-9a59-2a1c3f0b6d11&orderInfo=Thanh toan lich hen 1\
             &partnerCode=MOMODEMO&redirectUrl=https://clinic.example/api/v1/payments/momo/return\
             &requestId=7f9c2f0e-4a57-4d5e-9a59-2a1c3f0b6d11&requestType=payWithMethod"
        );
    }

    #[test]
    fn momo_missing_field_matches_empty_field() {
        let signer = GatewaySigner::momo("MOMOSECRET", "DEMOACCESS");
        let mut without_extra = momo_request();
        without_extra.remove("extraData");

        assert_eq!(
            signer.canonicalize(&without_extra, SignedMessage::PaymentRequest),
            signer.canonicalize(&momo_request(), SignedMessage::PaymentRequest)
        );
    }

    #[test]
    fn momo_known_answer() {
        let signer = GatewaySigner::momo("MOMOSECRET", "DEMOACCESS");
        let signature = signer
            .sign(&momo_request(), SignedMessage::PaymentRequest)
            .unwrap();

        assert_eq!(
            signature,
            "dc837c9f9ae717a8dbf6abbd3c5d1841b498bac9ca0cdfc3ee9afbf8f17dad1f"
        );
    }

    #[test]
    fn momo_status_query_signs_only_its_four_fields() {
        let signer = GatewaySigner::momo("MOMOSECRET", "DEMOACCESS");
        let canonical = signer.canonicalize(&momo_request(), SignedMessage::StatusQuery);

        assert_eq!(
            canonical,
            format!("accessKey=DEMOACCESS&orderId={ORDER_ID}&partnerCode=MOMODEMO&requestId={ORDER_ID}")
        );
    }

    #[test]
    fn signed_payloads_verify_in_either_case() {
        for (signer, request) in [
            (GatewaySigner::vnpay("VNPAYSECRET"), vnpay_request()),
            (
                GatewaySigner::momo("MOMOSECRET", "DEMOACCESS"),
                momo_request(),
            ),
        ] {
            let signature = signer.sign(&request, SignedMessage::PaymentRequest).unwrap();
            assert!(signer.verify(&request, SignedMessage::PaymentRequest, &signature));
            assert!(signer.verify(
                &request,
                SignedMessage::PaymentRequest,
                &signature.to_uppercase()
            ));
        }
    }

    #[test]
    fn verify_fails_closed() {
        let signer = GatewaySigner::vnpay("VNPAYSECRET");
        let request = vnpay_request();

        assert!(!signer.verify(&request, SignedMessage::Notification, ""));
        assert!(!signer.verify(&request, SignedMessage::Notification, "not-hex"));
        assert!(!signer.verify(&request, SignedMessage::Notification, "abcd"));

        let unconfigured = GatewaySigner::vnpay("");
        assert!(unconfigured.sign(&request, SignedMessage::Notification).is_err());
        let signature = signer.sign(&request, SignedMessage::Notification).unwrap();
        assert!(!unconfigured.verify(&request, SignedMessage::Notification, &signature));
    }

    #[test]
    fn form_encode_matches_form_urlencoded_rules() {
        assert_eq!(form_encode("a b*c-d.e_f~g/h"), "a+b*c-d.e_f%7Eg%2Fh");
        assert_eq!(form_encode("Thanh toán"), "Thanh+to%C3%A1n");
    }
}
