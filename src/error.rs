//! Application error types and result alias.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application result type alias
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error types.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Duplicate or malformed version for a name.
    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    /// Per-name version ceiling reached.
    #[error("Maximum versions reached: {0}")]
    MaxVersionsReached(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Missing, malformed, or expired token.
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// Disallowed state transition or concurrent-write conflict.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Importer or enrichment source failed; callers log and continue.
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// A runtime backend rejected or failed an apply.
    #[error("Runtime apply failed: {0}")]
    RuntimeApplyFailed(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Map error variant to HTTP status code and problem title.
    fn status_and_title(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Configuration Error"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "Not Found"),
            Self::AlreadyExists(_) => (StatusCode::CONFLICT, "Already Exists"),
            Self::InvalidVersion(_) => (StatusCode::BAD_REQUEST, "Invalid Version"),
            Self::MaxVersionsReached(_) => {
                (StatusCode::TOO_MANY_REQUESTS, "Maximum Versions Reached")
            }
            Self::ValidationFailed(_) => (StatusCode::BAD_REQUEST, "Validation Failed"),
            Self::PermissionDenied(_) => (StatusCode::FORBIDDEN, "Permission Denied"),
            Self::Unauthenticated(_) | Self::Jwt(_) => {
                (StatusCode::UNAUTHORIZED, "Unauthenticated")
            }
            Self::Conflict(_) => (StatusCode::CONFLICT, "Conflict"),
            Self::UpstreamUnavailable(_) => (StatusCode::BAD_GATEWAY, "Upstream Unavailable"),
            Self::RuntimeApplyFailed(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Runtime Apply Failed")
            }
            Self::NotImplemented(_) => (StatusCode::NOT_IMPLEMENTED, "Not Implemented"),
            Self::Database(_) | Self::Sqlx(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Database Error")
            }
            Self::Migration(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Migration Error"),
            Self::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO Error"),
            Self::Json(_) => (StatusCode::BAD_REQUEST, "Invalid JSON"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal Error"),
        }
    }

    /// Return a user-facing detail string. Wrapped foreign errors
    /// (Sqlx, Io, ...) are hidden to avoid leaking internals.
    fn detail(&self) -> String {
        match self {
            Self::Sqlx(_) | Self::Database(_) => "Database operation failed".to_string(),
            Self::Migration(_) => "Database migration failed".to_string(),
            Self::Io(_) => "IO operation failed".to_string(),
            Self::Json(e) => format!("Invalid JSON: {e}"),
            Self::Jwt(_) => "Invalid token".to_string(),
            // All other variants carry their own user-facing message
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, title) = self.status_and_title();
        let detail = self.detail();

        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "Request error");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
        }

        let body = Json(json!({
            "title": title,
            "status": status.as_u16(),
            "detail": detail,
        }));

        (
            status,
            [(header::CONTENT_TYPE, "application/problem+json")],
            body,
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalogue_error_status_codes() {
        let cases = [
            (AppError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (AppError::AlreadyExists("x".into()), StatusCode::CONFLICT),
            (AppError::InvalidVersion("x".into()), StatusCode::BAD_REQUEST),
            (
                AppError::MaxVersionsReached("x".into()),
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                AppError::ValidationFailed("x".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                AppError::PermissionDenied("x".into()),
                StatusCode::FORBIDDEN,
            ),
            (
                AppError::Unauthenticated("x".into()),
                StatusCode::UNAUTHORIZED,
            ),
            (AppError::Conflict("x".into()), StatusCode::CONFLICT),
            (
                AppError::NotImplemented("x".into()),
                StatusCode::NOT_IMPLEMENTED,
            ),
            (
                AppError::RuntimeApplyFailed("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(err.status_and_title().0, expected, "wrong status for {err}");
        }
    }

    #[test]
    fn test_database_detail_is_opaque() {
        let err = AppError::Database("connection refused to 10.0.0.3:5432".into());
        assert_eq!(err.detail(), "Database operation failed");
    }

    #[test]
    fn test_domain_errors_keep_their_message() {
        let err = AppError::ValidationFailed("name is required".into());
        assert!(err.detail().contains("name is required"));
    }
}
