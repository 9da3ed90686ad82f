use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use parley_shared::{HubError, HubErrorKind};
use parley_store::StoreError;

/// Failures of hub operations, already sorted into the client-visible kinds.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    AccessDenied(String),

    /// Infrastructure failure. The message is safe to show a client; the
    /// cause has already been logged.
    #[error("{0}")]
    Transient(String),
}

impl ServiceError {
    /// Translate a store error at a service boundary. `what` names the thing
    /// being looked up, e.g. "Chat", and is used for not-found messages.
    pub fn from_store(what: &str, err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ServiceError::NotFound(format!("{what} not found")),
            StoreError::Conflict(reason) => ServiceError::Validation(reason),
            other => {
                tracing::error!(error = %other, entity = what, "store operation failed");
                ServiceError::Transient("The service is temporarily unavailable".into())
            }
        }
    }

    pub fn kind(&self) -> HubErrorKind {
        match self {
            ServiceError::Validation(_) => HubErrorKind::Validation,
            ServiceError::NotFound(_) => HubErrorKind::NotFound,
            ServiceError::Unauthorized(_) => HubErrorKind::Unauthorized,
            ServiceError::AccessDenied(_) => HubErrorKind::AccessDenied,
            ServiceError::Transient(_) => HubErrorKind::Transient,
        }
    }
}

impl From<ServiceError> for HubError {
    fn from(err: ServiceError) -> Self {
        HubError::new(err.kind(), err.to_string())
    }
}

/// Errors of the plain HTTP surface (health, hub upgrade).
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Too many requests")]
    TooManyRequests,}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::TooManyRequests => (StatusCode::TOO_MANY_REQUESTS, self.to_string()),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
