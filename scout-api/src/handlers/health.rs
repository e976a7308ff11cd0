use axum::{extract::State, Json};
use scout_workflow::resilience::CircuitState;

use crate::{dto::HealthResponse, AppState};

/// Reports `degraded` while the provider breaker is not closed.
pub async fn check(State(state): State<AppState>) -> Json<HealthResponse> {
    let breaker = state.driver.breaker().state();
    let status = match breaker {
        CircuitState::Closed => "healthy",
        CircuitState::Open | CircuitState::HalfOpen => "degraded",
    };

    Json(HealthResponse {
        status: status.to_string(),
        breaker: breaker.to_string(),
        tracked_pipelines: state.driver.registry().len().await,
    })
}
