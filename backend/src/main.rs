use anyhow::Result;
use backend::axum_http::http_serve;
use backend::config::config_loader;
use crates::infra::db::postgres::postgres_connection;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        error!(error = %error, "payment api: exited with error");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    crates::observability::init_observability("payment-api")?;

    let dotenvy_env = config_loader::load()?;
    info!(
        port = dotenvy_env.backend_server.port,
        stale_pending_after_minutes = dotenvy_env.payments.stale_pending_after_minutes,
        admin_routes = dotenvy_env.payments.admin_token.is_some(),
        payer_webhook = dotenvy_env.notifications.webhook_url.is_some(),
        "payment api: configuration loaded"
    );
    let postgres_pool = postgres_connection::establish_connection(&dotenvy_env.database.url)?;
    info!("payment api: ledger database pool ready");

    http_serve::start(Arc::new(dotenvy_env), Arc::new(postgres_pool)).await?;
    info!("payment api: stopped");
    Ok(())
}
