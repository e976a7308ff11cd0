//! SDK configuration
//!
//! This module provides configuration options for the SDK client.

use crate::error::{SdkError, SdkResult};
use std::time::Duration;

/// Interval between status polls unless overridden.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Configuration for the SDK client
#[derive(Debug, Clone)]
pub struct SdkConfig {
    /// Base URL for the API
    pub base_url: String,

    /// Timeout for non-streaming requests. Run streams are never timed out.
    pub timeout: Duration,

    /// Connection timeout
    pub connect_timeout: Duration,

    /// Maximum number of retries for status reads
    pub max_retries: u32,

    /// Initial backoff duration for retries
    pub retry_initial_backoff: Duration,

    /// Maximum backoff duration for retries
    pub retry_max_backoff: Duration,

    /// Default interval for [`crate::ScoutClient::poll_until_terminal`]
    pub poll_interval: Duration,

    /// User agent string
    pub user_agent: String,

    /// Custom headers to add to all requests
    pub custom_headers: Vec<(String, String)>,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            max_retries: 3,
            retry_initial_backoff: Duration::from_millis(500),
            retry_max_backoff: Duration::from_secs(10),
            poll_interval: DEFAULT_POLL_INTERVAL,
            user_agent: format!("scout-sdk/{}", env!("CARGO_PKG_VERSION")),
            custom_headers: Vec::new(),
        }
    }
}

impl SdkConfig {
    /// Create a new configuration with the given base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Set the request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the connection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the maximum number of retries
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the retry backoff configuration
    pub fn with_retry_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.retry_initial_backoff = initial;
        self.retry_max_backoff = max;
        self
    }

    /// Set the status polling interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the user agent string
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Add a custom header to all requests
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_headers.push((name.into(), value.into()));
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> SdkResult<()> {
        if self.base_url.is_empty() {
            return Err(SdkError::ConfigurationError(
                "Base URL cannot be empty".to_string(),
            ));
        }

        url::Url::parse(&self.base_url)?;

        if self.timeout.is_zero() {
            return Err(SdkError::ConfigurationError(
                "Timeout cannot be zero".to_string(),
            ));
        }

        if self.poll_interval.is_zero() {
            return Err(SdkError::ConfigurationError(
                "Poll interval cannot be zero".to_string(),
            ));
        }

        Ok(())
    }
}
