use std::time::Duration;

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::IntoResponse,
};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::{dao::storage::StorageError, services::sync_engine::SyncError};

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// The actor has to wait before mutating again.
    #[error("cooldown active for another {}ms", remaining.as_millis())]
    CooldownActive { remaining: Duration },
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Every persistence tier failed.
    #[error("persistence failed: {0}")]
    Persistence(String),
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::Unavailable(err)
    }
}

impl From<SyncError> for ServiceError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::CooldownActive { remaining } => ServiceError::CooldownActive { remaining },
            SyncError::MutationInFlight { .. } | SyncError::WriteConflict(_) => {
                ServiceError::InvalidState(err.to_string())
            }
            SyncError::StoreUnreachable(source) => ServiceError::Unavailable(source),
            SyncError::PersistenceFailure(_) => ServiceError::Persistence(err.to_string()),
        }
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest(format!("validation failed: {}", err))
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Caller must wait before retrying.
    #[error("too many requests: {message}")]
    TooManyRequests { message: String, retry_after: Duration },
    /// Conflict with current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Service unavailable or degraded.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unavailable(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::CooldownActive { remaining } => AppError::TooManyRequests {
                message: err.to_string(),
                retry_after: remaining,
            },
            ServiceError::InvalidState(message) => AppError::Conflict(message),
            ServiceError::Persistence(message) => AppError::ServiceUnavailable(message),
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
        }
    }
}

impl From<SyncError> for AppError {
    fn from(err: SyncError) -> Self {
        ServiceError::from(err).into()
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_ms: Option<u64>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        let retry_after = match &self {
            AppError::TooManyRequests { retry_after, .. } => Some(*retry_after),
            _ => None,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
            retry_after_ms: retry_after.map(|wait| wait.as_millis() as u64),
        });

        let mut response = (status, payload).into_response();
        if let Some(wait) = retry_after {
            // Retry-After only carries whole seconds; round up so clients never retry early.
            let seconds = wait.as_millis().div_ceil(1_000);
            if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }
        response
    }
}
