use anyhow::Result;
use crates::{
    application::{
        payment_notifications::PaymentNotifier, payment_state_machine::PaymentStateMachine,
    },
    domain::{
        clock::{Clock, SystemClock},
        repositories::payments::PaymentRepository,
    },
    infra::{
        db::{postgres::postgres_connection, repositories::payments::PaymentPostgres},
        notifications::notification_sink,
    },
    payments::{gateway::GatewayRegistry, momo_client::MoMoClient, vnpay_client::VnPayClient},
};
use std::{sync::Arc, time::Duration};
use tracing::{error, info};
use worker::{
    axum_http, config,
    services::reconciliation_scheduler::ReconciliationScheduler,
    usecases::reconcile_stale_payments::{
        GatewayCheck, ReconcileParams, ReconcileStalePaymentsUseCase,
    },
};

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(error) = run().await {
        error!("Worker exited with error: {}", error);
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    crates::observability::init_observability("worker")?;

    let dotenvy_env = Arc::new(config::config_loader::load()?);
    info!("ENV has been loaded");

    let postgres_pool = postgres_connection::establish_connection(&dotenvy_env.database.url)?;
    info!("Postgres connection has been established");

    let db_pool_arc = Arc::new(postgres_pool);

    let repository: Arc<dyn PaymentRepository + Send + Sync> =
        Arc::new(PaymentPostgres::new(Arc::clone(&db_pool_arc)));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let state_machine = PaymentStateMachine::new(Arc::clone(&repository), Arc::clone(&clock));
    let notifier = PaymentNotifier::new(notification_sink(
        dotenvy_env.notifications.webhook_url.as_deref(),
    )?);

    let gateways = GatewayRegistry::new()
        .with(Arc::new(VnPayClient::new(dotenvy_env.vnpay.clone())))
        .with(Arc::new(MoMoClient::new(dotenvy_env.momo.clone())?));

    let reconcile_usecase = Arc::new(ReconcileStalePaymentsUseCase::new(
        repository,
        state_machine,
        gateways,
        notifier,
        clock,
    ));

    let settings = &dotenvy_env.reconciliation;
    let params = ReconcileParams {
        stale_after: chrono::Duration::seconds(settings.stale_after_secs),
        limit: settings.batch_limit,
        gateway_check: settings.gateway_check_enabled.then(|| GatewayCheck {
            max_checks: settings.gateway_check_max,
            timeout: Duration::from_millis(settings.gateway_timeout_ms),
        }),
    };
    info!(
        stale_after_secs = settings.stale_after_secs,
        gateway_check = settings.gateway_check_enabled,
        "reconciliation configured"
    );

    let scheduler = Arc::new(ReconciliationScheduler::new(reconcile_usecase, params));

    // Spawn background loop
    let reconciliation_loop = tokio::spawn(
        Arc::clone(&scheduler).run(Duration::from_secs(settings.interval_secs)),
    );

    let server_config = Arc::clone(&dotenvy_env);
    let worker_server =
        tokio::spawn(async move { axum_http::http_serve::start(server_config, scheduler).await });

    tokio::select! {
        result = reconciliation_loop => result??,
        result = worker_server => result??,
    };
    Ok(())
}
