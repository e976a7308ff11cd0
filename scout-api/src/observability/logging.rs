//! Structured logging setup and request correlation IDs.
//!
//! # Examples
//!
//! ```rust,no_run
//! use scout_api::observability::logging::{init_logging, LogConfig};
//!
//! init_logging(LogConfig::default()).expect("Failed to initialize logging");
//! ```

use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};
use serde::{Deserialize, Serialize};
use tracing::{info, info_span, Instrument};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};
use uuid::Uuid;

// ============================================================================
// Constants
// ============================================================================

/// HTTP header for request correlation ID
pub const REQUEST_ID_HEADER: &str = "x-request-id";

// ============================================================================
// Configuration
// ============================================================================

/// Log format configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format for production (machine-readable)
    Json,
    /// Pretty format for development (human-readable)
    Pretty,
    /// Compact format for minimal output
    Compact,
}

impl Default for LogFormat {
    fn default() -> Self {
        #[cfg(debug_assertions)]
        return Self::Pretty;

        #[cfg(not(debug_assertions))]
        return Self::Json;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub format: LogFormat,
    /// Default level when neither `filter` nor `RUST_LOG` is set
    pub level: String,
    /// Per-module directives, e.g. "scout_workflow=debug,tower_http=warn"
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: "info".to_string(),
            filter: None,
        }
    }
}

impl LogConfig {
    fn env_filter(&self) -> Result<EnvFilter, Box<dyn std::error::Error>> {
        Ok(match self.filter {
            Some(ref filter) => EnvFilter::try_new(filter)?,
            None => EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&self.level)),
        })
    }
}

// ============================================================================
// Initialization
// ============================================================================

/// Installs the global subscriber. Fails if one is already set.
pub fn init_logging(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = config.env_filter()?;

    match config.format {
        LogFormat::Json => {
            let json_layer = fmt::layer()
                .json()
                .with_span_events(FmtSpan::CLOSE)
                .with_current_span(true)
                .with_thread_ids(true)
                .with_filter(env_filter);

            tracing_subscriber::registry().with(json_layer).try_init()?;
        }
        LogFormat::Pretty => {
            let pretty_layer = fmt::layer()
                .pretty()
                .with_span_events(FmtSpan::CLOSE)
                .with_filter(env_filter);

            tracing_subscriber::registry().with(pretty_layer).try_init()?;
        }
        LogFormat::Compact => {
            let compact_layer = fmt::layer().compact().with_filter(env_filter);

            tracing_subscriber::registry().with(compact_layer).try_init()?;
        }
    }

    info!("Logging system initialized with format: {:?}", config.format);
    Ok(())
}

// ============================================================================
// Middleware
// ============================================================================

/// Reuses the caller's `x-request-id` or mints one, runs the request inside
/// a span carrying it, and echoes it on the response.
pub async fn request_id_middleware(request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let span = info_span!(
        "request",
        request_id = %request_id,
        method = %request.method(),
        path = %request.uri().path(),
    );
    let mut response = next.run(request).instrument(span).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
