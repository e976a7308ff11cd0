use axum::{
    extract::{Query, State},
    Json,
};
use scout_core::Pipeline;

use crate::{dto::PipelineQuery, error::ApiResult, AppState};

/// Current snapshot of one pipeline. Read-only, safe to poll.
pub async fn get(
    State(state): State<AppState>,
    Query(query): Query<PipelineQuery>,
) -> ApiResult<Json<Pipeline>> {
    let id = query.parse_id()?;
    let pipeline = state.driver.get_status(id).await?;
    Ok(Json(pipeline))
}
