use http::StatusCode;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::value_objects::enums::payment_statuses::PaymentStatus;

/// Failures talking to a payment gateway. Only `Rejected` is a statement by the
/// gateway about the payment; every other variant says nothing about its outcome.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway rejected the request ({code}): {message}")]
    Rejected { code: String, message: String },
    #[error("gateway call timed out")]
    Timeout,
    #[error("gateway transport error: {0}")]
    Transport(String),
    #[error("gateway returned an invalid response: {0}")]
    InvalidResponse(String),
    #[error("{0}")]
    Unsupported(String),
    #[error("gateway is misconfigured: {0}")]
    Misconfigured(String),
}

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("{0}")]
    Validation(String),
    #[error("payment {0} not found")]
    NotFound(Uuid),
    #[error("appointment {appointment_id} already has an outstanding charge {existing_payment_id}")]
    Conflict {
        appointment_id: Uuid,
        existing_payment_id: Uuid,
    },
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("payment {payment_id} is {current}; cannot {attempted}")]
    InvalidState {
        payment_id: Uuid,
        current: PaymentStatus,
        attempted: String,
    },
    #[error("refund of {requested} exceeds the captured balance of {available}")]
    InsufficientBalance {
        requested: Decimal,
        available: Decimal,
    },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type PaymentResult<T> = std::result::Result<T, PaymentError>;

impl PaymentError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            PaymentError::Validation(_) => StatusCode::BAD_REQUEST,
            PaymentError::NotFound(_) => StatusCode::NOT_FOUND,
            PaymentError::Conflict { .. } => StatusCode::CONFLICT,
            PaymentError::Gateway(_) => StatusCode::BAD_GATEWAY,
            PaymentError::InvalidState { .. } => StatusCode::CONFLICT,
            PaymentError::InsufficientBalance { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            PaymentError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        PaymentError::Validation(message.into())
    }
}
