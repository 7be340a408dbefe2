//! Error handling module for the train position backend.
//!
//! Provides centralized error types with mapping to HTTP status codes and response envelopes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Stable reason codes returned to clients.
#[allow(dead_code)]
pub mod codes {
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const UNKNOWN_TRAIN: &str = "UNKNOWN_TRAIN";
    pub const INCONSISTENT_ROUTE: &str = "INCONSISTENT_ROUTE";
    pub const STALE_OR_INVALID_TIMESTAMP: &str = "STALE_OR_INVALID_TIMESTAMP";
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const INVALID_STATE: &str = "INVALID_STATE";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
    pub const DATABASE_ERROR: &str = "DATABASE_ERROR";
    pub const SEARCH_ERROR: &str = "SEARCH_ERROR";
    pub const BAD_REQUEST: &str = "BAD_REQUEST";
}

/// Application error type.
#[derive(Debug, Clone, PartialEq)]
pub enum AppError {
    /// Authentication required
    Unauthorized(String),
    /// Unknown station or proposal
    NotFound(String),
    /// Report for a train that is not in the current snapshot
    UnknownTrain(String),
    /// Claimed position is not on the train's route
    InconsistentRoute(String),
    /// Report timestamp is in the future or outside the freshness window
    StaleTimestamp(String),
    /// Malformed or inconsistent input
    Validation(String),
    /// Proposal already resolved
    InvalidState(String),
    /// Database error
    Database(String),
    /// Search index error
    Search(String),
    /// Broken internal invariant; indicates a bug
    Internal(String),
    /// Bad request
    BadRequest(String),
}

impl AppError {
    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::UnknownTrain(_) => StatusCode::NOT_FOUND,
            AppError::InconsistentRoute(_) => StatusCode::BAD_REQUEST,
            AppError::StaleTimestamp(_) => StatusCode::BAD_REQUEST,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidState(_) => StatusCode::CONFLICT,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Search(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Unauthorized(_) => codes::UNAUTHORIZED,
            AppError::NotFound(_) => codes::NOT_FOUND,
            AppError::UnknownTrain(_) => codes::UNKNOWN_TRAIN,
            AppError::InconsistentRoute(_) => codes::INCONSISTENT_ROUTE,
            AppError::StaleTimestamp(_) => codes::STALE_OR_INVALID_TIMESTAMP,
            AppError::Validation(_) => codes::VALIDATION_ERROR,
            AppError::InvalidState(_) => codes::INVALID_STATE,
            AppError::Database(_) => codes::DATABASE_ERROR,
            AppError::Search(_) => codes::SEARCH_ERROR,
            AppError::Internal(_) => codes::INTERNAL_ERROR,
            AppError::BadRequest(_) => codes::BAD_REQUEST,
        }
    }

    /// Get the error message.
    pub fn message(&self) -> String {
        match self {
            AppError::Unauthorized(msg)
            | AppError::NotFound(msg)
            | AppError::UnknownTrain(msg)
            | AppError::InconsistentRoute(msg)
            | AppError::StaleTimestamp(msg)
            | AppError::Validation(msg)
            | AppError::InvalidState(msg)
            | AppError::Database(msg)
            | AppError::Search(msg)
            | AppError::Internal(msg)
            | AppError::BadRequest(msg) => msg.clone(),
        }
    }

    /// Report a broken invariant. Logged here so no caller can forget to.
    pub fn invariant(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        tracing::error!("Internal invariant violation: {}", msg);
        AppError::Internal(msg)
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error_code(), self.message())
    }
}

impl std::error::Error for AppError {}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {:?}", err);
        AppError::Database(format!("Database error: {}", err))
    }
}

impl From<tantivy::TantivyError> for AppError {
    fn from(err: tantivy::TantivyError) -> Self {
        tracing::error!("Search error: {:?}", err);
        AppError::Search(format!("Search error: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!("JSON error: {:?}", err);
        AppError::BadRequest(format!("JSON error: {}", err))
    }
}

/// Error details in the response envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Error response envelope.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorDetails,
    pub revision_id: i64,
}

impl ErrorResponse {
    pub fn new(error: &AppError, revision_id: i64) -> Self {
        Self {
            success: false,
            error: ErrorDetails {
                code: error.error_code().to_string(),
                message: error.message(),
                details: None,
            },
            revision_id,
        }
    }
}

/// Wrapper type for errors that carry revision_id context.
pub struct AppErrorWithRevision {
    pub error: AppError,
    pub revision_id: i64,
}

impl IntoResponse for AppErrorWithRevision {
    fn into_response(self) -> Response {
        let status = self.error.status_code();
        let body = ErrorResponse::new(&self.error, self.revision_id);
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_rejections_are_client_errors() {
        for err in [
            AppError::InconsistentRoute("x".into()),
            AppError::StaleTimestamp("x".into()),
            AppError::Validation("x".into()),
        ] {
            assert!(err.status_code().is_client_error(), "{}", err);
        }
        assert_eq!(
            AppError::UnknownTrain("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_invalid_state_is_conflict() {
        let err = AppError::InvalidState("already accepted".into());
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.error_code(), codes::INVALID_STATE);
    }
}
