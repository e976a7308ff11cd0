//! HTTP calls with failure classification.
//!
//! Failures are classified once, here, and never re-classified by callers:
//! network errors, timeouts, 5xx responses and unreadable payloads are
//! retryable; anything below 500, an open breaker and cancellation are not.

use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

use super::circuit_breaker::CircuitBreakerError;
use super::retry::{run_with_retry, RetryOptions, RetryOutcome};
use super::timeout::TimeoutError;

const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid payload: {0}")]
    Decode(String),

    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    #[error("circuit breaker {0} is open")]
    CircuitOpen(String),

    #[error("run cancelled")]
    Cancelled,
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Network(_) | TransportError::Timeout(_) | TransportError::Decode(_) => {
                true
            }
            TransportError::Status { status, .. } => *status >= 500,
            TransportError::CircuitOpen(_) | TransportError::Cancelled => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(TimeoutError {
                message: err.to_string(),
                elapsed: Duration::ZERO,
            })
        } else if err.is_decode() {
            TransportError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            TransportError::Status {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::Decode(err.to_string())
    }
}

impl From<CircuitBreakerError<TransportError>> for TransportError {
    fn from(err: CircuitBreakerError<TransportError>) -> Self {
        match err {
            CircuitBreakerError::Open { name } | CircuitBreakerError::Rejected { name } => {
                TransportError::CircuitOpen(name)
            }
            CircuitBreakerError::ExecutionFailed(inner) => inner,
        }
    }
}

/// Default options paired with the transport predicate.
pub fn transport_retry_options() -> RetryOptions<TransportError> {
    RetryOptions::new().with_retry_condition(TransportError::is_retryable)
}

/// Sends one request. Non-2xx responses become [`TransportError::Status`].
pub async fn send_classified(request: RequestBuilder) -> Result<Response, TransportError> {
    let response = request.send().await?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, body))
}

fn status_error(status: StatusCode, mut body: String) -> TransportError {
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    TransportError::Status {
        status: status.as_u16(),
        body,
    }
}

/// Retries a request built fresh by `build` for every attempt. The
/// transport predicate replaces any condition set on `options`.
pub async fn fetch_with_retry<F>(
    options: &RetryOptions<TransportError>,
    mut build: F,
) -> RetryOutcome<Response, TransportError>
where
    F: FnMut() -> RequestBuilder,
{
    let options = options
        .clone()
        .with_retry_condition(TransportError::is_retryable);
    run_with_retry(&options, || send_classified(build())).await
}

/// Like [`fetch_with_retry`], with the body parsed as JSON inside each
/// attempt so a garbled payload is retried too.
pub async fn fetch_json_with_retry<T, F>(
    options: &RetryOptions<TransportError>,
    mut build: F,
) -> RetryOutcome<T, TransportError>
where
    T: DeserializeOwned,
    F: FnMut() -> RequestBuilder,
{
    let options = options
        .clone()
        .with_retry_condition(TransportError::is_retryable);
    run_with_retry(&options, || {
        let request = build();
        async move {
            let response = send_classified(request).await?;
            let bytes = response.bytes().await?;
            let value = serde_json::from_slice::<T>(&bytes)?;
            debug!(bytes = bytes.len(), "decoded response payload");
            Ok::<T, TransportError>(value)
        }
    })
    .await
}
