use anyhow::{Context, Result};

const VNPAY_SANDBOX_PAY_URL: &str = "https://sandbox.vnpayment.vn/paymentv2/vpcpay.html";
const MOMO_SANDBOX_CREATE_URL: &str = "https://test-payment.momo.vn/v2/gateway/api/create";
const MOMO_SANDBOX_QUERY_URL: &str = "https://test-payment.momo.vn/v2/gateway/api/query";

#[derive(Debug, Clone)]
pub struct VnPayConfig {
    pub pay_url: String,
    pub return_url: String,
    pub tmn_code: String,
    pub secret_key: String,
    pub version: String,
    pub command: String,
    pub order_type: String,
    pub locale: String,
    pub expire_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct MoMoConfig {
    pub create_url: String,
    pub query_url: String,
    pub notify_url: String,
    pub return_url: String,
    pub partner_code: String,
    pub access_key: String,
    pub secret_key: String,
    pub request_type: String,
    pub partner_name: String,
    pub store_id: String,
    pub lang: String,
    pub timeout_secs: u64,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

impl VnPayConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            pay_url: env_or("VNPAY_PAY_URL", VNPAY_SANDBOX_PAY_URL),
            return_url: env_or("VNPAY_RETURN_URL", ""),
            tmn_code: env_or("VNPAY_TMN_CODE", ""),
            secret_key: env_or("VNPAY_SECRET_KEY", ""),
            version: env_or("VNPAY_VERSION", "2.1.0"),
            command: env_or("VNPAY_COMMAND", "pay"),
            order_type: env_or("VNPAY_ORDER_TYPE", "other"),
            locale: env_or("VNPAY_LOCALE", "vn"),
            expire_minutes: env_or("VNPAY_EXPIRE_MINUTES", "15")
                .parse()
                .context("VNPAY_EXPIRE_MINUTES is invalid")?,
        })
    }

    /// Names of required settings that are still empty.
    pub fn missing(&self) -> Vec<&'static str> {
        [
            ("VNPAY_RETURN_URL", &self.return_url),
            ("VNPAY_TMN_CODE", &self.tmn_code),
            ("VNPAY_SECRET_KEY", &self.secret_key),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(key, _)| key)
        .collect()
    }
}

impl MoMoConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            create_url: env_or("MOMO_CREATE_URL", MOMO_SANDBOX_CREATE_URL),
            query_url: env_or("MOMO_QUERY_URL", MOMO_SANDBOX_QUERY_URL),
            notify_url: env_or("MOMO_NOTIFY_URL", ""),
            return_url: env_or("MOMO_RETURN_URL", ""),
            partner_code: env_or("MOMO_PARTNER_CODE", ""),
            access_key: env_or("MOMO_ACCESS_KEY", ""),
            secret_key: env_or("MOMO_SECRET_KEY", ""),
            request_type: env_or("MOMO_REQUEST_TYPE", "payWithMethod"),
            partner_name: env_or("MOMO_PARTNER_NAME", "Clinic"),
            store_id: env_or("MOMO_STORE_ID", "ClinicStore"),
            lang: env_or("MOMO_LANG", "vi"),
            timeout_secs: env_or("MOMO_TIMEOUT_SECS", "10")
                .parse()
                .context("MOMO_TIMEOUT_SECS is invalid")?,
        })
    }

    pub fn missing(&self) -> Vec<&'static str> {
        [
            ("MOMO_NOTIFY_URL", &self.notify_url),
            ("MOMO_RETURN_URL", &self.return_url),
            ("MOMO_PARTNER_CODE", &self.partner_code),
            ("MOMO_ACCESS_KEY", &self.access_key),
            ("MOMO_SECRET_KEY", &self.secret_key),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(key, _)| key)
        .collect()
    }
}
