//! Resilience primitives used around calls to the scraping provider.
//!
//! The three pieces are independent and compose in either order:
//!
//! ```no_run
//! use scout_workflow::resilience::{
//!     run_with_retry_timeout, CircuitBreaker, CircuitBreakerConfig, RetryOptions, TransportError,
//! };
//! use std::time::Duration;
//!
//! # async fn example() {
//! let breaker = CircuitBreaker::new("provider", CircuitBreakerConfig::default());
//! let options = RetryOptions::<TransportError>::default()
//!     .with_retry_condition(TransportError::is_retryable);
//!
//! let outcome = breaker
//!     .execute(|| async {
//!         run_with_retry_timeout(&options, Duration::from_secs(30), || async {
//!             Ok::<_, TransportError>(42)
//!         })
//!         .await
//!         .into_result()
//!     })
//!     .await;
//! # let _ = outcome;
//! # }
//! ```

pub mod circuit_breaker;
pub mod retry;
pub mod timeout;
pub mod transport;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerStats, CircuitState,
};
pub use retry::{run_with_retry, run_with_retry_timeout, JitterStrategy, RetryOptions, RetryOutcome};
pub use timeout::{with_timeout, TimeoutError, DEFAULT_TIMEOUT_MESSAGE};
pub use transport::{
    fetch_json_with_retry, fetch_with_retry, send_classified, transport_retry_options,
    TransportError,
};
