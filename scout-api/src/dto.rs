use scout_core::PipelineId;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::ApiError;

/// Default ceiling on the handle list. `RunLimits::max_handles` is what
/// submissions are checked against.
pub const MAX_HANDLES: usize = 100;

// Run submission

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DiscoveryRequest {
    /// Newline-delimited keyword list.
    #[validate(length(min = 1, max = 10000))]
    pub keywords: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct MetricsRequest {
    #[validate(length(min = 1))]
    pub handles: Vec<String>,
}

// Status polling

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineQuery {
    pub pipeline_id: Option<String>,
}

impl PipelineQuery {
    pub fn parse_id(&self) -> Result<PipelineId, ApiError> {
        let raw = self
            .pipeline_id
            .as_deref()
            .map(str::trim)
            .filter(|raw| !raw.is_empty())
            .ok_or_else(|| ApiError::BadRequest("pipelineId is required".to_string()))?;
        raw.parse()
            .map_err(|_| ApiError::BadRequest(format!("invalid pipelineId: {}", raw)))
    }
}

// Health

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub breaker: String,
    pub tracked_pipelines: usize,
}
