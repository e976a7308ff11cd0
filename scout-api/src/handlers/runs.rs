use axum::{extract::State, response::Response};
use scout_core::RunPlan;
use tracing::info;

use crate::{dto::*, error::ApiResult, sse, validation::ValidatedJson, AppState};

pub async fn discovery(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<DiscoveryRequest>,
) -> ApiResult<Response> {
    let job = RunPlan::discovery(&payload.keywords, state.limits.max_keywords)?;
    start(state, job).await
}

pub async fn metrics(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<MetricsRequest>,
) -> ApiResult<Response> {
    let job = RunPlan::metrics(&payload.handles, state.limits.max_handles)?;
    start(state, job).await
}

async fn start(state: AppState, job: RunPlan) -> ApiResult<Response> {
    let session = state.driver.start(job).await;
    info!(
        run_id = %session.run_id,
        kind = ?session.kind,
        pipelines = session.pipeline_ids.len(),
        "run submitted"
    );
    Ok(sse::run_response(session))
}
