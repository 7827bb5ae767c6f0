use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
    routing::post,
};
use crates::payments::signer::tokens_match;
use serde_json::json;
use tracing::error;

use crate::services::reconciliation_scheduler::{ReconciliationScheduler, SweepOutcome};

// Run example
//   curl -X POST "http://localhost:$SERVER_PORT_WORKER/internal/v1/reconciliation/run" \
//     -H "Authorization: Bearer $INTERNAL_RECONCILE_TOKEN"

#[derive(Clone)]
pub struct ReconciliationRouteState {
    scheduler: Arc<ReconciliationScheduler>,
    internal_token: Option<String>,
}

pub fn routes(scheduler: Arc<ReconciliationScheduler>, internal_token: Option<String>) -> Router {
    Router::new()
        .route("/run", post(run_reconciliation))
        .with_state(ReconciliationRouteState {
            scheduler,
            internal_token,
        })
}

pub async fn run_reconciliation(
    State(state): State<ReconciliationRouteState>,
    headers: HeaderMap,
) -> Response {
    let expected_token = match state.internal_token.as_deref() {
        Some(token) => token,
        None => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                "reconciliation token is not configured",
            )
                .into_response();
        }
    };

    if let Err(status) = authorize_bearer(&headers, expected_token) {
        return (status, "unauthorized").into_response();
    }

    match state.scheduler.run_once().await {
        Ok(SweepOutcome::Completed(result)) => Json(result).into_response(),
        Ok(SweepOutcome::SkippedAlreadyRunning) => (
            StatusCode::CONFLICT,
            Json(json!({ "message": "reconciliation already running" })),
        )
            .into_response(),
        Err(err) => {
            error!(error = ?err, "reconciliation: manual sweep failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "reconciliation failed").into_response()
        }
    }
}

fn authorize_bearer(headers: &HeaderMap, expected_token: &str) -> Result<(), StatusCode> {
    let auth = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token = auth
        .strip_prefix("Bearer ")
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if tokens_match(token, expected_token) {
        Ok(())
    } else {
        Err(StatusCode::UNAUTHORIZED)
    }
}
