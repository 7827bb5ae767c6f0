use std::fmt::Display;

use serde::{Deserialize, Serialize};

use super::payment_methods::PaymentMethod;

/// Third-party payment gateways. `VnPay` speaks the sorted/HMAC-SHA512 protocol,
/// `MoMo` the fixed-order/HMAC-SHA256 one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Gateway {
    VnPay,
    MoMo,
}

impl Gateway {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gateway::VnPay => "vnpay",
            Gateway::MoMo => "momo",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "vnpay" => Some(Gateway::VnPay),
            "momo" => Some(Gateway::MoMo),
            _ => None,
        }
    }

    pub fn payment_method(&self) -> PaymentMethod {
        match self {
            Gateway::VnPay => PaymentMethod::VnPay,
            Gateway::MoMo => PaymentMethod::MoMo,
        }
    }
}

impl Display for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
