//! HTTP surface for pipeline runs.
//!
//! Run submission endpoints answer with a `text/event-stream` body carrying
//! the run's [`scout_core::StreamEvent`]s. Dropping that body cancels the
//! run. `GET /pipeline?pipelineId=` serves read-only snapshots.

pub mod dto;
pub mod error;
pub mod handlers;
pub mod observability;
pub mod sse;
pub mod validation;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use scout_workflow::RunDriver;
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use dto::*;
pub use error::{ApiError, ApiResult};
pub use validation::ValidatedJson;

/// Upper bounds on the size of a single run request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunLimits {
    pub max_keywords: usize,
    pub max_handles: usize,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            max_keywords: 50,
            max_handles: MAX_HANDLES,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub driver: RunDriver,
    pub limits: RunLimits,
}

impl AppState {
    pub fn new(driver: RunDriver, limits: RunLimits) -> Self {
        Self { driver, limits }
    }
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::check))
        .route("/pipeline", get(handlers::pipelines::get))
        .route("/pipeline/discovery", post(handlers::runs::discovery))
        .route("/pipeline/metrics", post(handlers::runs::metrics))
        .layer(middleware::from_fn(observability::request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
