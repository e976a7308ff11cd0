//! Deadline races for async work.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_TIMEOUT_MESSAGE: &str = "operation timed out";

/// The deadline fired before the work finished.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} after {elapsed:?}")]
pub struct TimeoutError {
    pub message: String,
    pub elapsed: Duration,
}

/// Races `future` against `duration`. On timeout the future is dropped, which
/// cancels it at its next await point.
pub async fn with_timeout<F, T, E>(duration: Duration, future: F, message: Option<&str>) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<TimeoutError>,
{
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => {
            let message = message.unwrap_or(DEFAULT_TIMEOUT_MESSAGE).to_string();
            warn!(?duration, %message, "deadline elapsed");
            Err(E::from(TimeoutError {
                message,
                elapsed: duration,
            }))
        }
    }
}
