use crates::payments::config::{MoMoConfig, VnPayConfig};

#[derive(Debug, Clone)]
pub struct DotEnvyConfig {
    pub worker_server: WorkerServer,
    pub database: Database,
    pub reconciliation: Reconciliation,
    pub vnpay: VnPayConfig,
    pub momo: MoMoConfig,
    pub notifications: Notifications,
}

#[derive(Debug, Clone)]
pub struct WorkerServer {
    pub port: u16,
    pub body_limit: u64,
    pub timeout: u64,
}

#[derive(Debug, Clone)]
pub struct Database {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub interval_secs: u64,
    pub stale_after_secs: i64,
    pub batch_limit: Option<i64>,
    /// Off by default; when on, stale rows are polled at their gateway before being failed.
    pub gateway_check_enabled: bool,
    pub gateway_check_max: usize,
    pub gateway_timeout_ms: u64,
    /// Bearer token for the manual trigger; the route answers 503 when unset.
    pub internal_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Notifications {
    pub webhook_url: Option<String>,
}
