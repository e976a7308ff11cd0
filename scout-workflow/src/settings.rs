//! Deserializable knobs for the run driver. Every struct defaults field by
//! field so partial config files work.

use serde::Deserialize;
use std::time::Duration;

use crate::resilience::{CircuitBreakerConfig, JitterStrategy, RetryOptions};

/// Durations written as whole milliseconds.
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: Option<u64>,
    pub jitter: JitterStrategy,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
            backoff_factor: 2.0,
            max_delay_ms: None,
            jitter: JitterStrategy::None,
        }
    }
}

impl RetrySettings {
    pub fn options<E>(&self) -> RetryOptions<E> {
        let options = RetryOptions::new()
            .with_max_retries(self.max_retries)
            .with_initial_delay(Duration::from_millis(self.initial_delay_ms))
            .with_backoff_factor(self.backoff_factor)
            .with_jitter(self.jitter);
        match self.max_delay_ms {
            Some(ms) => options.with_max_delay(Duration::from_millis(ms)),
            None => options,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DriverSettings {
    pub retry: RetrySettings,
    pub breaker: CircuitBreakerConfig,
    /// Deadline for one provider attempt
    pub step_timeout_secs: u64,
    pub search_actor: String,
    pub profile_actor: String,
    pub post_actor: String,
    pub max_posts_per_keyword: u32,
    pub lookback_days: u32,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            retry: RetrySettings::default(),
            breaker: CircuitBreakerConfig::default(),
            step_timeout_secs: 300,
            search_actor: "hashtag-search".to_string(),
            profile_actor: "profile-scraper".to_string(),
            post_actor: "post-scraper".to_string(),
            max_posts_per_keyword: 50,
            lookback_days: 30,
        }
    }
}

impl DriverSettings {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }
}
