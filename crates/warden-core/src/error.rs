use axum::http::StatusCode;
use chrono::NaiveDateTime;
use sea_orm::{DbErr, SqlErr};
use thiserror::Error;

use crate::response::ApiResponse;

/// Error kinds surfaced by the session, throttle and audit components.
#[derive(Debug, Error)]
pub enum WardenError {
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// A rate limit or an inactive session refused the request.
    /// `retry_at` is set when the refusal lifts at a known time.
    #[error("{reason}")]
    PolicyBlocked {
        reason: String,
        retry_at: Option<NaiveDateTime>,
    },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WardenError {
    /// Shorthand for a session-level refusal with no retry time.
    pub fn unauthorized(reason: impl Into<String>) -> Self {
        WardenError::PolicyBlocked {
            reason: reason.into(),
            retry_at: None,
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            WardenError::StorageUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            WardenError::NotFound(_) => StatusCode::NOT_FOUND,
            WardenError::Conflict(_) => StatusCode::CONFLICT,
            WardenError::PolicyBlocked { retry_at: None, .. } => StatusCode::UNAUTHORIZED,
            WardenError::PolicyBlocked { .. } => StatusCode::TOO_MANY_REQUESTS,
            WardenError::ValidationFailed(_) => StatusCode::BAD_REQUEST,
            WardenError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code string for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            WardenError::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
            WardenError::NotFound(_) => "NOT_FOUND",
            WardenError::Conflict(_) => "CONFLICT",
            WardenError::PolicyBlocked { .. } => "POLICY_BLOCKED",
            WardenError::ValidationFailed(_) => "VALIDATION_FAILED",
            WardenError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Message that is safe to hand back to a client. Store and internal
    /// failures never leak their details.
    pub fn public_message(&self) -> String {
        match self {
            WardenError::StorageUnavailable(_) | WardenError::Internal(_) => {
                "Internal server error".to_string()
            }
            WardenError::PolicyBlocked { reason, .. } => reason.clone(),
            other => other.to_string(),
        }
    }
}

impl From<DbErr> for WardenError {
    fn from(err: DbErr) -> Self {
        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(detail)) => WardenError::Conflict(detail),
            _ => match err {
                DbErr::RecordNotFound(detail) => WardenError::NotFound(detail),
                other => WardenError::StorageUnavailable(other.to_string()),
            },
        }
    }
}

impl axum::response::IntoResponse for WardenError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.error_code(), error = %self, "request failed");
        }
        ApiResponse::<()>::failure(status, self.public_message()).into_response()
    }
}

/// Result of an operation whose failure must not stop the caller.
///
/// `Degraded` carries the value the caller should proceed with (for the
/// throttle this is the fail-open decision) together with the reason the
/// normal path could not be taken.
#[must_use]
#[derive(Debug)]
pub enum Outcome<T> {
    Ok(T),
    Degraded { value: T, reason: String },
    Fatal(WardenError),
}

impl<T> Outcome<T> {
    pub fn degraded(value: T, reason: impl Into<String>) -> Self {
        Outcome::Degraded {
            value,
            reason: reason.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok(_))
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Outcome::Degraded { .. })
    }

    /// The value to proceed with, for both the normal and the degraded path.
    pub fn value(&self) -> Option<&T> {
        match self {
            Outcome::Ok(value) | Outcome::Degraded { value, .. } => Some(value),
            Outcome::Fatal(_) => None,
        }
    }

    /// Collapse into a `Result`, treating degradation as success.
    pub fn into_result(self) -> Result<T, WardenError> {
        match self {
            Outcome::Ok(value) | Outcome::Degraded { value, .. } => Ok(value),
            Outcome::Fatal(err) => Err(err),
        }
    }
}
