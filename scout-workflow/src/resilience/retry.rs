//! Retry with exponential backoff.
//!
//! Attempt `n` that fails with a retryable error is followed by a pause of
//! `initial_delay * backoff_factor^(n-1)` before attempt `n + 1`, for at most
//! `max_retries` retries. Jitter and a delay cap are opt-in.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::timeout::{with_timeout, TimeoutError};

pub type RetryCondition<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;
pub type RetryObserver<E> = Arc<dyn Fn(&E, u32) + Send + Sync>;

/// Jitter strategy for retry delays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JitterStrategy {
    /// Exact geometric delays
    #[default]
    None,
    /// Random value between 0 and the computed delay
    Full,
    /// Half the computed delay plus a random half
    Equal,
}

impl JitterStrategy {
    fn apply(&self, delay: Duration) -> Duration {
        match self {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                let jitter = rand::random::<f64>();
                Duration::from_secs_f64(delay.as_secs_f64() * jitter)
            }
            JitterStrategy::Equal => {
                let jitter = rand::random::<f64>();
                let base = delay.as_secs_f64() / 2.0;
                Duration::from_secs_f64(base + (base * jitter))
            }
        }
    }
}

/// Options for one retrying invocation.
pub struct RetryOptions<E> {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Option<Duration>,
    pub jitter: JitterStrategy,
    retry_condition: RetryCondition<E>,
    on_retry: Option<RetryObserver<E>>,
}

impl<E> Default for RetryOptions<E> {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
            backoff_factor: 2.0,
            max_delay: None,
            jitter: JitterStrategy::None,
            retry_condition: Arc::new(|_| true),
            on_retry: None,
        }
    }
}

impl<E> Clone for RetryOptions<E> {
    fn clone(&self) -> Self {
        Self {
            max_retries: self.max_retries,
            initial_delay: self.initial_delay,
            backoff_factor: self.backoff_factor,
            max_delay: self.max_delay,
            jitter: self.jitter,
            retry_condition: Arc::clone(&self.retry_condition),
            on_retry: self.on_retry.clone(),
        }
    }
}

impl<E> fmt::Debug for RetryOptions<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOptions")
            .field("max_retries", &self.max_retries)
            .field("initial_delay", &self.initial_delay)
            .field("backoff_factor", &self.backoff_factor)
            .field("max_delay", &self.max_delay)
            .field("jitter", &self.jitter)
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

impl<E> RetryOptions<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Factors below 1 are raised to 1.
    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = if factor.is_finite() { factor.max(1.0) } else { 1.0 };
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    pub fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_retry_condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.retry_condition = Arc::new(condition);
        self
    }

    pub fn with_on_retry<F>(mut self, observer: F) -> Self
    where
        F: Fn(&E, u32) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(observer));
        self
    }

    pub fn is_retryable(&self, error: &E) -> bool {
        (self.retry_condition)(error)
    }

    /// Pause that follows failed attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let nanos = self.initial_delay.as_nanos() as f64 * self.backoff_factor.powi(exponent);
        let mut delay = Duration::from_nanos(nanos.round() as u64);
        if let Some(max) = self.max_delay {
            delay = delay.min(max);
        }
        self.jitter.apply(delay)
    }
}

/// Result of a retrying invocation. `attempts` is 1-based.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
}

impl<T, E> RetryOutcome<T, E> {
    pub fn success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn data(&self) -> Option<&T> {
        self.result.as_ref().ok()
    }

    pub fn error(&self) -> Option<&E> {
        self.result.as_ref().err()
    }

    pub fn into_result(self) -> Result<T, E> {
        self.result
    }
}

/// Runs `work` until it succeeds, fails with a non-retryable error, or the
/// retry budget is spent.
pub async fn run_with_retry<F, Fut, T, E>(options: &RetryOptions<E>, mut work: F) -> RetryOutcome<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let mut attempts = 0u32;

    loop {
        attempts += 1;

        match work().await {
            Ok(value) => {
                if attempts > 1 {
                    debug!(attempts, "operation succeeded after retrying");
                }
                return RetryOutcome {
                    result: Ok(value),
                    attempts,
                };
            }
            Err(error) => {
                if !options.is_retryable(&error) {
                    debug!(attempts, error = %error, "error is not retryable, giving up");
                    return RetryOutcome {
                        result: Err(error),
                        attempts,
                    };
                }

                if attempts > options.max_retries {
                    warn!(attempts, error = %error, "retry budget exhausted");
                    return RetryOutcome {
                        result: Err(error),
                        attempts,
                    };
                }

                if let Some(observer) = &options.on_retry {
                    observer(&error, attempts);
                }

                let delay = options.delay_for(attempts);
                debug!(attempt = attempts, ?delay, error = %error, "retrying after failure");
                sleep(delay).await;
            }
        }
    }
}

/// Like [`run_with_retry`], but each attempt races `per_attempt`. A timed
/// out attempt is dropped and counts as a failed attempt.
pub async fn run_with_retry_timeout<F, Fut, T, E>(
    options: &RetryOptions<E>,
    per_attempt: Duration,
    mut work: F,
) -> RetryOutcome<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display + From<TimeoutError>,
{
    run_with_retry(options, || with_timeout(per_attempt, work(), None)).await
}
