//! # Error Handling and Response Types
//!
//! This module defines the error taxonomy of the artifact registry and the way each
//! error is presented to callers.
//!
//! ## Key Types
//!
//! - [`AppError`]: Main error enum covering all possible engine errors
//! - [`ApiErrorResponse`]: Standardized JSON error response format
//! - [`ErrorCode`]: Machine-readable error classification
//! - [`AppResult<T>`]: Convenience type alias for Results using `AppError`
//!
//! ## Error Response Format
//!
//! All errors leaving the HTTP adapter use the same JSON shape:
//!
//! ```json
//! {
//!   "error": "Human-readable error message",
//!   "code": "machine_readable_error_code",
//!   "details": null,
//!   "timestamp": "2024-01-01T12:00:00Z"
//! }
//! ```
//!
//! Internal storage failures keep their originating context for the failure sink,
//! but only ever render the generic `Internal server error` message.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};

use crate::storage::StorageError;

/// Standardized error response structure for consistent API error handling
#[derive(Serialize, Debug)]
pub struct ApiErrorResponse {
    pub error: String,          // Human-readable error message
    pub code: String,           // Machine-readable error code
    pub details: Option<Value>, // Additional error details
    pub timestamp: String,      // ISO 8601 timestamp
}

/// Error code classification for machine-readable error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ValidationError,
    NotFound,
    UpstreamUnavailable,
    AuthError,
    Forbidden,
    QuotaExceeded,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "validation_error",
            ErrorCode::NotFound => "not_found",
            ErrorCode::UpstreamUnavailable => "upstream_unavailable",
            ErrorCode::AuthError => "auth_error",
            ErrorCode::Forbidden => "forbidden",
            ErrorCode::QuotaExceeded => "quota_exceeded",
            ErrorCode::InternalError => "internal_error",
        }
    }

    pub fn http_status(&self) -> StatusCode {
        match self {
            ErrorCode::ValidationError => StatusCode::BAD_REQUEST,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::UpstreamUnavailable => StatusCode::BAD_GATEWAY,
            ErrorCode::AuthError => StatusCode::UNAUTHORIZED,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::QuotaExceeded => StatusCode::INSUFFICIENT_STORAGE,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Application-specific error types with error codes
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    UpstreamUnavailable(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("{0}")]
    QuotaExceeded(String),

    /// Backend I/O failure. `context` names the repository and location and is
    /// only ever handed to the failure sink.
    #[error("Internal server error")]
    InternalStorage {
        context: String,
        #[source]
        source: StorageError,
    },

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Get the appropriate error code for this error type
    pub fn error_code(&self) -> ErrorCode {
        match self {
            AppError::BadRequest(_) => ErrorCode::ValidationError,
            AppError::NotFound(_) => ErrorCode::NotFound,
            AppError::UpstreamUnavailable(_) => ErrorCode::UpstreamUnavailable,
            AppError::Unauthorized(_) => ErrorCode::AuthError,
            AppError::Forbidden(_) => ErrorCode::Forbidden,
            AppError::QuotaExceeded(_) => ErrorCode::QuotaExceeded,
            AppError::InternalStorage { .. } | AppError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Wrap a storage failure with the coordinate it happened on.
    ///
    /// A missing entry stays a plain [`AppError::NotFound`]; everything else becomes
    /// an internal storage error.
    pub fn storage(context: impl Into<String>, source: StorageError) -> Self {
        match source {
            StorageError::NotFound(location) => {
                AppError::NotFound(format!("Resource not found: {location}"))
            }
            source => AppError::InternalStorage {
                context: context.into(),
                source,
            },
        }
    }

    /// Whether this error must be reported to the failure sink before it is returned.
    pub fn is_internal(&self) -> bool {
        self.error_code() == ErrorCode::InternalError
    }

    /// Context for operational reporting. Never rendered to callers.
    pub fn report_context(&self) -> String {
        match self {
            AppError::InternalStorage { context, source } => format!("{context}: {source}"),
            AppError::Internal(e) => format!("{e:#}"),
            other => other.to_string(),
        }
    }

    /// Get additional error details if available
    pub fn details(&self) -> Option<Value> {
        match self {
            AppError::QuotaExceeded(_) => Some(json!({"retryable": false})),
            _ => None,
        }
    }

    /// Create a standardized error response
    pub fn to_error_response(&self) -> ApiErrorResponse {
        let code = self.error_code();
        ApiErrorResponse {
            error: self.to_string(),
            code: code.as_str().to_string(),
            details: self.details(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.error_code().http_status();
        if self.is_internal() {
            tracing::error!(error = %self.report_context(), "Request failed");
        } else {
            tracing::debug!(status = %status, error = %self, "Request rejected");
        }

        let error_response = self.to_error_response();
        (status, axum::Json(error_response)).into_response()
    }
}

/// Convenient result type for application operations.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::Location;

    #[test]
    fn test_storage_not_found_maps_to_not_found() {
        let location = Location::parse("com/example/lib/1.0/lib-1.0.jar").unwrap();
        let error = AppError::storage("releases", StorageError::NotFound(location));
        assert_eq!(error.error_code(), ErrorCode::NotFound);
        assert!(!error.is_internal());
    }

    #[test]
    fn test_internal_storage_error_does_not_leak_context() {
        let error = AppError::storage(
            "releases/com/example/lib-1.0.jar",
            StorageError::Io {
                path: "/var/lib/registry/repositories/releases/com".to_string(),
                source: std::io::Error::other("disk on fire"),
            },
        );

        let response = error.to_error_response();
        assert_eq!(response.error, "Internal server error");
        assert_eq!(response.code, "internal_error");
        assert!(!response.error.contains("/var/lib"));
        assert!(error.report_context().contains("disk on fire"));
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(
            AppError::UpstreamUnavailable("x".into())
                .error_code()
                .http_status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            AppError::Forbidden("x".into()).error_code().http_status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::BadRequest("x".into()).error_code().http_status(),
            StatusCode::BAD_REQUEST
        );
    }
}
