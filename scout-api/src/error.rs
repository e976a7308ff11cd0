use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use scout_core::CoreError;
use serde_json::json;
use thiserror::Error;
use validator::ValidationErrors;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<ValidationErrors> for ApiError {
    fn from(errors: ValidationErrors) -> Self {
        ApiError::Validation(format!("Validation failed: {}", errors))
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(msg) => ApiError::Validation(msg),
            CoreError::NotFound(msg) => ApiError::NotFound(msg),
            CoreError::InvalidState(msg) => ApiError::Conflict(msg),
            CoreError::Internal(msg) | CoreError::Serialization(msg) => ApiError::Internal(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, details) = match &self {
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, "Validation error", Some(msg.clone())),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "Resource not found", Some(msg.clone())),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "Bad request", Some(msg.clone())),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "Conflict", Some(msg.clone())),
            ApiError::Internal(err) => {
                tracing::error!(error = %err, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
        };

        let mut response_json = json!({
            "error": message,
        });

        if let Some(details_msg) = details {
            response_json["details"] = json!(details_msg);
        }

        (status, Json(response_json)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
