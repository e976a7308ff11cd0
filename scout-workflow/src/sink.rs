use async_trait::async_trait;
use dashmap::DashMap;
use scout_core::{PipelineId, Result, RunKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// One record handed over by a pipeline's final step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SinkRecord {
    pub handle: String,
    pub kind: RunKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyword: Option<String>,
    pub payload: serde_json::Value,
}

/// Destination for the results of a finished pipeline.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Stores `records` and returns how many were kept.
    async fn save(&self, pipeline_id: PipelineId, records: Vec<SinkRecord>) -> Result<usize>;

    /// Releases whatever the sink holds for pipelines the registry has
    /// evicted. Durable sinks keep their records and report 0.
    async fn evict(&self, _pipeline_ids: &[PipelineId]) -> usize {
        0
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryResultSink {
    records: Arc<DashMap<PipelineId, Vec<SinkRecord>>>,
}

impl InMemoryResultSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self, pipeline_id: PipelineId) -> Vec<SinkRecord> {
        self.records
            .get(&pipeline_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    pub fn total(&self) -> usize {
        self.records.iter().map(|entry| entry.value().len()).sum()
    }
}

#[async_trait]
impl ResultSink for InMemoryResultSink {
    async fn save(&self, pipeline_id: PipelineId, records: Vec<SinkRecord>) -> Result<usize> {
        let count = records.len();
        self.records.entry(pipeline_id).or_default().extend(records);
        debug!(%pipeline_id, count, "stored records");
        Ok(count)
    }

    async fn evict(&self, pipeline_ids: &[PipelineId]) -> usize {
        pipeline_ids
            .iter()
            .filter_map(|id| self.records.remove(id))
            .map(|(_, records)| records.len())
            .sum()
    }
}
