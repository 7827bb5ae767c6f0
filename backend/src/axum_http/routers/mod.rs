use std::sync::Arc;

use axum::http::{HeaderMap, header::AUTHORIZATION};
use crates::payments::signer::tokens_match;

use crate::{
    axum_http::error_responses::AppError,
    config::config_model::PaymentSettings,
    usecases::{payment_callbacks::PaymentCallbackUseCase, payments::PaymentUseCase},
};

pub mod payment_admin;
pub mod payments;

#[cfg(test)]
mod test_support;

/// Shared by the public payment routes and the admin routes.
#[derive(Clone)]
pub struct PaymentRouteState {
    pub payments: Arc<PaymentUseCase>,
    pub callbacks: Arc<PaymentCallbackUseCase>,
    pub settings: Arc<PaymentSettings>,
}

/// Bearer check for operator routes. Without a configured token the routes are closed.
pub(crate) fn authorize_admin(headers: &HeaderMap, settings: &PaymentSettings) -> Result<(), AppError> {
    let expected = settings.admin_token.as_deref().ok_or(AppError::NotConfigured)?;
    let presented = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim);

    match presented {
        Some(token) if tokens_match(token, expected) => Ok(()),
        _ => Err(AppError::Unauthorized),
    }
}
