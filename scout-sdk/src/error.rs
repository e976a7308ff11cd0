//! SDK error types and handling

use scout_workflow::resilience::TransportError;
use thiserror::Error;

/// The main error type for the SDK
#[derive(Error, Debug)]
pub enum SdkError {
    /// API returned an error response
    #[error("API error: {status} - {message}")]
    ApiError {
        /// HTTP status
        status: u16,
        /// The `error` field of the body, or the raw body
        message: String,
        /// The `details` field of the body, if any
        details: Option<String>,
    },

    /// Network or connection error
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Request timed out
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// The server rejected the request body
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// A response body that could not be decoded
    #[error("Invalid payload: {0}")]
    Decode(String),

    /// URL parsing error
    #[error("Invalid URL: {0}")]
    UrlError(#[from] url::ParseError),

    /// Server error
    #[error("Server error: {0}")]
    ServerError(String),

    /// The event stream broke the framing contract
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Result type alias for SDK operations
pub type SdkResult<T> = Result<T, SdkError>;

/// API error response structure
#[derive(Debug, serde::Deserialize)]
pub struct ApiErrorResponse {
    /// Short error category
    pub error: String,
    /// Human readable detail
    #[serde(default)]
    pub details: Option<String>,
}

impl SdkError {
    /// Create an API error from a response
    pub fn from_response(status: u16, body: &str) -> Self {
        if let Ok(error_response) = serde_json::from_str::<ApiErrorResponse>(body) {
            let detail = error_response
                .details
                .clone()
                .unwrap_or_else(|| error_response.error.clone());
            return match status {
                400 | 422 => SdkError::ValidationError(detail),
                404 => SdkError::NotFound(detail),
                500..=599 => SdkError::ServerError(detail),
                _ => SdkError::ApiError {
                    status,
                    message: error_response.error,
                    details: error_response.details,
                },
            };
        }

        match status {
            500..=599 => SdkError::ServerError(body.to_string()),
            _ => SdkError::ApiError {
                status,
                message: body.to_string(),
                details: None,
            },
        }
    }

    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SdkError::NetworkError(_)
                | SdkError::Timeout(_)
                | SdkError::ServerError(_)
                | SdkError::Decode(_)
        )
    }

    /// Get the HTTP status code if available
    pub fn status_code(&self) -> Option<u16> {
        match self {
            SdkError::ApiError { status, .. } => Some(*status),
            SdkError::NotFound(_) => Some(404),
            SdkError::ValidationError(_) => Some(400),
            SdkError::ServerError(_) => Some(500),
            _ => None,
        }
    }
}

impl From<TransportError> for SdkError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Network(msg) => SdkError::NetworkError(msg),
            TransportError::Status { status, body } => SdkError::from_response(status, &body),
            TransportError::Decode(msg) => SdkError::Decode(msg),
            TransportError::Timeout(err) => SdkError::Timeout(err.to_string()),
            TransportError::CircuitOpen(name) => SdkError::ApiError {
                status: 503,
                message: "circuit breaker open".to_string(),
                details: Some(name),
            },
            TransportError::Cancelled => SdkError::NetworkError("request cancelled".to_string()),
        }
    }
}

impl From<reqwest::Error> for SdkError {
    fn from(err: reqwest::Error) -> Self {
        TransportError::from(err).into()
    }
}
