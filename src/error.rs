// src/error.rs
use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::message::ErrorResponse;
use crate::services::generator::GenerationError;

/// Errors surfaced to HTTP callers. Startup errors (`LoadError`,
/// `ModelLoadError`, `ConfigError`) never reach this type.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid request: {message}")]
    Validation { status: StatusCode, message: String },

    #[error(transparent)]
    Generation(#[from] GenerationError),
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        AppError::Validation {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn method_not_allowed() -> Self {
        AppError::Validation {
            status: StatusCode::METHOD_NOT_ALLOWED,
            message: "Method not allowed".to_string(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation { status, .. } => *status,
            AppError::Generation(GenerationError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Generation(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }

        // No partial reply on failure: the body only ever carries `error`.
        let body = ErrorResponse {
            error: match &self {
                AppError::Validation { message, .. } => message.clone(),
                AppError::Generation(GenerationError::Timeout(_)) => {
                    "Reply generation timed out".to_string()
                }
                AppError::Generation(_) => "Failed to generate a reply".to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn status_mapping() {
        assert_eq!(AppError::bad_request("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AppError::from(GenerationError::Inference("boom".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::from(GenerationError::Timeout(Duration::from_secs(1))).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }
}
