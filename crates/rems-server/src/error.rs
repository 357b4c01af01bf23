//! HTTP-facing errors for the administrative and ETASU surfaces.
//!
//! Hook endpoints never return these for business outcomes; they always
//! answer with a card list.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rems_storage::StorageError;
use serde_json::{Value, json};

use crate::proxy::ForwardError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// A downstream administrator failed.
    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Connection store unavailable: {0}")]
    StoreUnavailable(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "invalid"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "not-found"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "duplicate"),
            Self::Upstream(_) => (StatusCode::BAD_GATEWAY, "exception"),
            Self::StoreUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "transient"),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { .. } => Self::NotFound(err.to_string()),
            StorageError::AlreadyExists { .. } => Self::Conflict(err.to_string()),
            StorageError::InvalidRecord { .. } => Self::BadRequest(err.to_string()),
            StorageError::Unavailable { .. } => Self::StoreUnavailable(err.to_string()),
        }
    }
}

impl From<ForwardError> for ApiError {
    fn from(err: ForwardError) -> Self {
        Self::Upstream(err.to_string())
    }
}

/// FHIR `OperationOutcome` with a single issue.
pub fn operation_outcome(severity: &str, code: &str, diagnostics: impl Into<String>) -> Value {
    json!({
        "resourceType": "OperationOutcome",
        "issue": [{
            "severity": severity,
            "code": code,
            "diagnostics": diagnostics.into()
        }]
    })
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::warn!(error = %self, status = status.as_u16(), "Request failed");
        }
        let body = operation_outcome("error", code, self.to_string());
        (status, Json(body)).into_response()
    }
}
