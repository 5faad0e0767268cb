use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::auth::{AuthError, KeyResolutionError};
use crate::database::DatabaseError;

#[derive(Error, Debug)]
pub enum CommonError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Missing required configuration key `{key}`")]
    ConfigurationMissing { key: String },

    #[error("Authentication error: {0}")]
    Authentication(#[from] AuthError),

    #[error("Authorization error: {0}")]
    Authorization(String),

    #[error("Key resolution error: {0}")]
    KeyResolution(#[from] KeyResolutionError),

    #[error("Database connection error: {0}")]
    Connection(#[from] DatabaseError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl CommonError {
    pub fn missing(key: impl Into<String>) -> Self {
        CommonError::ConfigurationMissing { key: key.into() }
    }

    /// Status code and machine-readable code sent to clients.
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            CommonError::Authentication(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            CommonError::Authorization(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            CommonError::KeyResolution(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            CommonError::Config(_) | CommonError::ConfigurationMissing { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR")
            }
            CommonError::Connection(_) => (StatusCode::SERVICE_UNAVAILABLE, "DATABASE_ERROR"),
            CommonError::Io(_) | CommonError::Json(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
}

impl IntoResponse for CommonError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        // Details stay server-side; clients only get the code
        tracing::error!(
            code = %code,
            status = %status.as_u16(),
            message = %self,
            "Request failed"
        );

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
            },
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, CommonError>;
