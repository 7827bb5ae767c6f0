use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use crates::domain::errors::{GatewayError, PaymentError};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub code: u16,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub message: String,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
            data,
        })
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Admin access is not configured")]
    NotConfigured,

    #[error(transparent)]
    Payment(#[from] PaymentError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            AppError::NotConfigured => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            AppError::Payment(err) => {
                let status = err.status_code();
                let message = match &err {
                    // Don't leak internal error detail to client
                    PaymentError::Internal(_) => "Internal server error".to_string(),
                    PaymentError::Gateway(GatewayError::Timeout | GatewayError::Transport(_)) => {
                        "Payment gateway is unavailable, please try again".to_string()
                    }
                    PaymentError::Gateway(GatewayError::Misconfigured(_)) => {
                        "Payment gateway is not available".to_string()
                    }
                    other => other.to_string(),
                };
                (status, message)
            }
        };

        let body = Json(ErrorResponse {
            success: false,
            code: status.as_u16(),
            message,
        });

        (status, body).into_response()
    }
}
