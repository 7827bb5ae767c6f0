use std::fmt::Display;

use serde::{Deserialize, Serialize};

use super::gateways::Gateway;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Cash,
    Card,
    VnPay,
    MoMo,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
            PaymentMethod::VnPay => "vnpay",
            PaymentMethod::MoMo => "momo",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "cash" => Some(PaymentMethod::Cash),
            "card" => Some(PaymentMethod::Card),
            "vnpay" => Some(PaymentMethod::VnPay),
            "momo" => Some(PaymentMethod::MoMo),
            _ => None,
        }
    }

    /// The gateway that settles this method, if any.
    pub fn gateway(&self) -> Option<Gateway> {
        match self {
            PaymentMethod::VnPay => Some(Gateway::VnPay),
            PaymentMethod::MoMo => Some(Gateway::MoMo),
            PaymentMethod::Cash | PaymentMethod::Card => None,
        }
    }
}

impl Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
