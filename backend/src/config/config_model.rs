use crates::payments::config::{MoMoConfig, VnPayConfig};

#[derive(Debug, Clone)]
pub struct DotEnvyConfig {
    pub backend_server: BackendServer,
    pub database: Database,
    pub payments: PaymentSettings,
    pub vnpay: VnPayConfig,
    pub momo: MoMoConfig,
    pub notifications: Notifications,
}

#[derive(Debug, Clone)]
pub struct BackendServer {
    pub port: u16,
    pub body_limit: u64,
    pub timeout: u64,
}

#[derive(Debug, Clone)]
pub struct Database {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct PaymentSettings {
    /// Browser landing page after a gateway return.
    pub result_page_url: String,
    /// Bearer token for refunds and admin routes; those routes answer 503 when unset.
    pub admin_token: Option<String>,
    pub stale_pending_after_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct Notifications {
    pub webhook_url: Option<String>,
}
