use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::payments::PaymentError;
use crate::premium::{PolicyError, PremiumError};
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
    #[error("not found")]
    NotFound,
    #[error("unauthorized")]
    Unauthorized,
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    ServiceUnavailable(String),
    #[error("{0}")]
    Message(String),
}

impl From<PolicyError> for AppError {
    fn from(err: PolicyError) -> Self {
        match err {
            PolicyError::AlreadyTrialed
            | PolicyError::TrialWhileActive
            | PolicyError::InvalidPeriod(_) => AppError::BadRequest(err.to_string()),
            _ => AppError::Forbidden(err.to_string()),
        }
    }
}

impl From<PremiumError> for AppError {
    fn from(err: PremiumError) -> Self {
        match err {
            PremiumError::Policy(policy) => policy.into(),
            PremiumError::Store(store) => AppError::Store(store),
            PremiumError::BundleNotFound(_) => AppError::NotFound,
            PremiumError::BundleExists(_) => AppError::Conflict(err.to_string()),
            PremiumError::Contended(..) => AppError::ServiceUnavailable(err.to_string()),
        }
    }
}

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::InvalidProduct(_) => AppError::BadRequest(err.to_string()),
            PaymentError::NotVisible(_) => AppError::Forbidden(err.to_string()),
            PaymentError::Policy(policy) => policy.into(),
            PaymentError::BundleNotFound(_) | PaymentError::TransactionNotFound(_) => {
                AppError::NotFound
            }
            PaymentError::ProviderUnavailable(_) => AppError::ServiceUnavailable(err.to_string()),
            PaymentError::InvalidTransition { .. } => AppError::Conflict(err.to_string()),
            PaymentError::Premium(premium) => premium.into(),
            PaymentError::Store(store) => AppError::Store(store),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Store(_) | AppError::Message(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(?self);
        } else {
            tracing::debug!(?self);
        }
        (status, self.to_string()).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
