use crate::{
    axum_http::{
        default_routers,
        routers::{self, PaymentRouteState},
    },
    config::config_model::DotEnvyConfig,
    usecases::{payment_callbacks::PaymentCallbackUseCase, payments::PaymentUseCase},
};
use anyhow::Result;
use axum::{
    Router,
    http::{
        Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::get,
};
use crates::{
    application::{
        payment_notifications::PaymentNotifier, payment_state_machine::PaymentStateMachine,
    },
    domain::{
        clock::{Clock, SystemClock},
        repositories::payments::PaymentRepository,
    },
    infra::{
        self,
        db::repositories::{appointments::AppointmentPostgres, payments::PaymentPostgres},
        notifications::notification_sink,
    },
    payments::{
        gateway::GatewayRegistry, momo_client::MoMoClient, verifier::CallbackVerifier,
        vnpay_client::VnPayClient,
    },
};
use infra::db::postgres::postgres_connection::PgPoolSquad;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};

pub async fn start(config: Arc<DotEnvyConfig>, db_pool: Arc<PgPoolSquad>) -> Result<()> {
    let state = payment_state(&config, db_pool)?;
    let callbacks = Arc::clone(&state.callbacks);

    let app = Router::new()
        .fallback(default_routers::not_found)
        .nest("/api/v1/payments", routers::payments::routes(state.clone()))
        .nest(
            "/api/v1/admin/payments",
            routers::payment_admin::routes(state),
        )
        .route("/api/v1/health-check", get(default_routers::health_check))
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.backend_server.timeout,
        )))
        .layer(RequestBodyLimitLayer::new(
            (config.backend_server.body_limit * 1024 * 1024).try_into()?,
        ))
        .layer(
            CorsLayer::new()
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([AUTHORIZATION, CONTENT_TYPE])
                .allow_origin(Any),
        )
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.backend_server.port));
    let listener = TcpListener::bind(addr).await?;

    info!("Server is running on port {}", config.backend_server.port);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    callbacks.drain_notifications().await;
    info!("Pending payer notifications delivered");

    Ok(())
}

fn payment_state(config: &DotEnvyConfig, db_pool: Arc<PgPoolSquad>) -> Result<PaymentRouteState> {
    for (gateway, missing) in [("vnpay", config.vnpay.missing()), ("momo", config.momo.missing())] {
        if !missing.is_empty() {
            warn!(gateway, ?missing, "payment gateway settings incomplete; checkouts will fail");
        }
    }
    if config.payments.admin_token.is_none() {
        warn!("ADMIN_API_TOKEN is not set; refund and admin routes are disabled");
    }

    let repository: Arc<dyn PaymentRepository + Send + Sync> =
        Arc::new(PaymentPostgres::new(Arc::clone(&db_pool)));
    let appointments = Arc::new(AppointmentPostgres::new(db_pool));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let state_machine = PaymentStateMachine::new(Arc::clone(&repository), Arc::clone(&clock));
    let notifier = PaymentNotifier::new(notification_sink(
        config.notifications.webhook_url.as_deref(),
    )?);

    let vnpay = VnPayClient::new(config.vnpay.clone());
    let momo = MoMoClient::new(config.momo.clone())?;
    let verifiers = [
        CallbackVerifier::new(vnpay.signer().clone()),
        CallbackVerifier::new(momo.signer().clone()),
    ];
    let gateways = GatewayRegistry::new()
        .with(Arc::new(vnpay))
        .with(Arc::new(momo));

    let payments = PaymentUseCase::new(
        appointments,
        Arc::clone(&repository),
        state_machine.clone(),
        gateways,
        notifier.clone(),
        clock,
        chrono::Duration::minutes(config.payments.stale_pending_after_minutes),
    );
    let callbacks = PaymentCallbackUseCase::new(repository, state_machine, notifier, verifiers);

    Ok(PaymentRouteState {
        payments: Arc::new(payments),
        callbacks: Arc::new(callbacks),
        settings: Arc::new(config.payments.clone()),
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to install CTRL+C signal handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received ctrl+C signal"),
        _ = terminate => info!("Received terminate signal"),
    }
}
