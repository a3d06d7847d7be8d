use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application-level error type.
///
/// Every component raises a typed variant at its boundary; this type owns
/// the translation to an HTTP status plus a generic message. Internals
/// (decrypted values, which token sub-check failed, SQL text) never
/// serialize into a response body.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Invalid subdomain: {0}")]
    InvalidSubdomain(String),

    #[error("Tenant not found: {0}")]
    TenantNotFound(String),

    #[error("Tenant suspended: {0}")]
    TenantSuspended(String),

    #[error("Subdomain already taken: {0}")]
    DuplicateSubdomain(String),

    #[error("Token rejected")]
    Unauthorized,

    #[error("Token tenant claims do not match resolved tenant")]
    TenantMismatch,

    #[error("Forbidden: {0}")]
    Forbidden(anyhow::Error),

    #[error("Credential decryption failed")]
    Decryption,

    #[error("No connection available within the wait bound")]
    PoolTimeout,

    #[error("Bad request: {0}")]
    BadRequest(anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("Conflict: {0}")]
    Conflict(anyhow::Error),

    #[error("Database error: {0}")]
    DatabaseError(anyhow::Error),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(anyhow::Error::new(err))
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        AppError::DatabaseError(anyhow::Error::new(err))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
        }

        let (status, error_message) = match &self {
            AppError::ValidationError(err) => {
                (StatusCode::UNPROCESSABLE_ENTITY, err.to_string())
            }
            AppError::InvalidSubdomain(s) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                format!("Invalid subdomain: {}", s),
            ),
            AppError::TenantNotFound(s) => {
                (StatusCode::NOT_FOUND, format!("Unknown tenant: {}", s))
            }
            AppError::TenantSuspended(s) => {
                (StatusCode::FORBIDDEN, format!("Tenant suspended: {}", s))
            }
            AppError::DuplicateSubdomain(s) => (
                StatusCode::CONFLICT,
                format!("Subdomain already taken: {}", s),
            ),
            // One message for every token failure mode; the precise cause
            // stays in the logs to avoid an oracle.
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "Invalid or expired token".to_string(),
            ),
            AppError::TenantMismatch => (
                StatusCode::FORBIDDEN,
                "Token is not valid for this tenant".to_string(),
            ),
            AppError::Forbidden(err) => (StatusCode::FORBIDDEN, err.to_string()),
            AppError::Decryption => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Credential decryption failed".to_string(),
            ),
            AppError::PoolTimeout => (
                StatusCode::SERVICE_UNAVAILABLE,
                "No database connection available, retry with backoff".to_string(),
            ),
            AppError::BadRequest(err) => (StatusCode::BAD_REQUEST, err.to_string()),
            AppError::NotFound(err) => (StatusCode::NOT_FOUND, err.to_string()),
            AppError::Conflict(err) => (StatusCode::CONFLICT, err.to_string()),
            AppError::DatabaseError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Database error".to_string(),
            ),
            AppError::ConfigError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Configuration error".to_string(),
            ),
            AppError::InternalError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        (
            status,
            Json(ErrorResponse {
                error: error_message,
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: AppError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn error_status_mapping() {
        assert_eq!(
            status_of(AppError::TenantNotFound("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(AppError::TenantSuspended("x".into())),
            StatusCode::FORBIDDEN
        );
        assert_eq!(status_of(AppError::Unauthorized), StatusCode::UNAUTHORIZED);
        assert_eq!(status_of(AppError::TenantMismatch), StatusCode::FORBIDDEN);
        assert_eq!(
            status_of(AppError::Decryption),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(AppError::PoolTimeout),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(AppError::DuplicateSubdomain("x".into())),
            StatusCode::CONFLICT
        );
    }
}
