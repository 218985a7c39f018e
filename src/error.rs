//! Authentication Error Types
//!
//! Centralized error handling for all authentication operations.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use uuid::Uuid;

/// Authentication errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid login credentials")]
    InvalidCredentials,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token is expired")]
    TokenExpired,

    #[error("Authentication required")]
    Unauthorized,

    #[error("Email already exists")]
    EmailExists,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Store operation timed out after {0} ms")]
    StoreTimeout(u64),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// HTTP status for this error
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::InvalidCredentials
            | AuthError::InvalidToken
            | AuthError::TokenExpired
            | AuthError::Unauthorized => StatusCode::UNAUTHORIZED,
            AuthError::EmailExists => StatusCode::CONFLICT,
            AuthError::Validation(_) => StatusCode::BAD_REQUEST,
            AuthError::Database(_)
            | AuthError::StoreTimeout(_)
            | AuthError::Config(_)
            | AuthError::Cache(_)
            | AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();

        let body = match &self {
            AuthError::InvalidCredentials => serde_json::json!({
                "error": "invalid_credentials",
                "message": self.to_string(),
            }),
            AuthError::InvalidToken => serde_json::json!({
                "error": "invalid_token",
                "message": self.to_string(),
                "valid": false,
            }),
            AuthError::TokenExpired => serde_json::json!({
                "error": "token_expired",
                "message": self.to_string(),
                "valid": false,
            }),
            AuthError::Unauthorized => serde_json::json!({
                "error": "unauthorized",
                "message": self.to_string(),
            }),
            AuthError::EmailExists => serde_json::json!({
                "error": "email_exists",
                "message": self.to_string(),
            }),
            AuthError::Validation(msg) => serde_json::json!({
                "error": "validation_error",
                "message": msg,
            }),
            AuthError::Database(_)
            | AuthError::StoreTimeout(_)
            | AuthError::Config(_)
            | AuthError::Cache(_)
            | AuthError::Internal(_) => {
                let error_id = Uuid::new_v4();
                tracing::error!(%error_id, error = %self, "Request failed with internal error");
                serde_json::json!({
                    "error": "internal_error",
                    "message": "An internal error occurred",
                    "error_id": error_id,
                })
            }
        };

        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {:?}", err);
        AuthError::Database(err.to_string())
    }
}

impl From<deadpool_redis::PoolError> for AuthError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        AuthError::Cache(err.to_string())
    }
}

impl From<deadpool_redis::redis::RedisError> for AuthError {
    fn from(err: deadpool_redis::redis::RedisError) -> Self {
        AuthError::Cache(err.to_string())
    }
}

impl From<argon2::password_hash::Error> for AuthError {
    fn from(err: argon2::password_hash::Error) -> Self {
        tracing::error!("Password hashing error: {:?}", err);
        AuthError::Internal("password hashing failed".to_string())
    }
}

impl From<validator::ValidationErrors> for AuthError {
    fn from(err: validator::ValidationErrors) -> Self {
        AuthError::Validation(err.to_string())
    }
}
