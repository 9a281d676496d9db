use axum::{Json, http::StatusCode, response::IntoResponse};
use thiserror::Error;

use super::models::ErrorResponse;
use crate::billing::{BillingError, PaymentError};
use crate::ledger::LedgerError;
use crate::lifecycle::LifecycleError;
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("payload invalid: {0}")]
    InvalidPayload(String),
    #[error("X-Account-Id header is required")]
    MissingAccount,
    #[error("payload too large: limit is {0} bytes")]
    PayloadTooLarge(u64),
    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),
    #[error("{0}")]
    UpgradeRequired(String),
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("upstream error: {0}")]
    Upstream(String),
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            ApiError::MissingAccount => StatusCode::UNAUTHORIZED,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::UpgradeRequired(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidPayload(_) => "INVALID_PAYLOAD",
            ApiError::MissingAccount => "MISSING_ACCOUNT",
            ApiError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            ApiError::UnsupportedMediaType(_) => "UNSUPPORTED_MEDIA_TYPE",
            ApiError::UpgradeRequired(_) => "UPGRADE_REQUIRED",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::Upstream(_) => "UPSTREAM_ERROR",
            ApiError::Unavailable(_) => "UNAVAILABLE",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "Request failed");
        }

        let body = ErrorResponse {
            code: self.code(),
            message: self.to_string(),
            requires_upgrade: matches!(self, ApiError::UpgradeRequired(_)),
        };

        (status, Json(body)).into_response()
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(value: serde_json::Error) -> Self {
        ApiError::InvalidPayload(value.to_string())
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::JobNotFound(id) => ApiError::NotFound(format!("job {id}")),
            LedgerError::AccountNotFound(id) => ApiError::NotFound(format!("account {id}")),
            LedgerError::AccountExists(_) | LedgerError::Conflict { .. } => {
                ApiError::Conflict(err.to_string())
            }
            LedgerError::Unavailable(reason) => ApiError::Unavailable(reason),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::InvalidDuration(_)
            | LifecycleError::InvalidRequest(_)
            | LifecycleError::MissingArtifacts(_) => ApiError::InvalidPayload(err.to_string()),
            LifecycleError::UnknownAccount(_) | LifecycleError::NotFound(_) => {
                ApiError::NotFound(err.to_string())
            }
            LifecycleError::InvalidTransition { .. } => ApiError::Conflict(err.to_string()),
            LifecycleError::UpgradeRequired { .. } => ApiError::UpgradeRequired(err.to_string()),
            LifecycleError::UpstreamUnavailable(reason) => ApiError::Unavailable(reason),
            LifecycleError::Store(e) => e.into(),
        }
    }
}

impl From<PaymentError> for ApiError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::NotConfigured => ApiError::Unavailable(err.to_string()),
            e if e.is_transient() => ApiError::Unavailable(e.to_string()),
            e => ApiError::Upstream(e.to_string()),
        }
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::UnknownAccount(_) => ApiError::NotFound(err.to_string()),
            BillingError::MissingEmail(_) | BillingError::InvalidEvent(_) => {
                ApiError::InvalidPayload(err.to_string())
            }
            BillingError::Payment(e) => e.into(),
            BillingError::Store(e) => e.into(),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => ApiError::NotFound(key),
            StorageError::InvalidKey(_) => ApiError::InvalidPayload(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}
