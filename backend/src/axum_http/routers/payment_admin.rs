use axum::{
    Router,
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::{get, post},
};
use uuid::Uuid;

use super::{PaymentRouteState, authorize_admin};
use crate::axum_http::error_responses::{ApiResponse, AppError};

pub fn routes(state: PaymentRouteState) -> Router {
    Router::new()
        .route("/statistics", get(statistics))
        .route("/stale-pending", get(stale_pending))
        .route("/:payment_id/check-status", post(check_status))
        .with_state(state)
}

pub async fn statistics(
    State(state): State<PaymentRouteState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    authorize_admin(&headers, &state.settings)?;
    let statistics = state.payments.statistics().await?;
    Ok(ApiResponse::ok("Payment statistics", statistics))
}

pub async fn stale_pending(
    State(state): State<PaymentRouteState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    authorize_admin(&headers, &state.settings)?;
    let stale = state.payments.list_stale_pending().await?;
    Ok(ApiResponse::ok("Stale pending payments", stale))
}

pub async fn check_status(
    State(state): State<PaymentRouteState>,
    Path(payment_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    authorize_admin(&headers, &state.settings)?;
    let payment = state.payments.check_status_from_gateway(payment_id).await?;
    Ok(ApiResponse::ok("Payment status checked", payment))
}
