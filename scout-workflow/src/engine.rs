//! Pipeline registry: the single owner of pipeline state.
//!
//! Writes go through [`PipelineRegistry::apply`], which updates the pipeline
//! and emits the matching stream events while holding the write lock, so a
//! poller and a stream consumer can never see the two disagree. Reads hand
//! out cloned snapshots.

use chrono::Utc;
use scout_core::{CoreError, Pipeline, PipelineId, Result, StreamEvent, Transition};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

/// Sending half of one run's event stream.
#[derive(Debug, Clone)]
pub struct RunEmitter {
    tx: mpsc::UnboundedSender<StreamEvent>,
}

impl RunEmitter {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<StreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Returns false once the consumer has gone away.
    pub fn emit(&self, event: StreamEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves when the consumer drops its receiver.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

#[derive(Debug, Clone, Default)]
pub struct PipelineRegistry {
    pipelines: Arc<RwLock<HashMap<PipelineId, Pipeline>>>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a new pipeline and announces it on the stream.
    pub async fn register(&self, pipeline: Pipeline, emitter: &RunEmitter) -> PipelineId {
        let id = pipeline.id();
        let mut pipelines = self.pipelines.write().await;
        emitter.emit(StreamEvent::registered(&pipeline));
        info!(pipeline_id = %id, label = %pipeline.label(), "pipeline registered");
        pipelines.insert(id, pipeline);
        id
    }

    /// Snapshot of one pipeline. Never mutates.
    pub async fn get_status(&self, id: PipelineId) -> Result<Pipeline> {
        self.pipelines
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("pipeline {}", id)))
    }

    pub async fn snapshots(&self, ids: &[PipelineId]) -> Vec<Pipeline> {
        let pipelines = self.pipelines.read().await;
        ids.iter().filter_map(|id| pipelines.get(id).cloned()).collect()
    }

    pub async fn len(&self) -> usize {
        self.pipelines.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pipelines.read().await.is_empty()
    }

    /// Applies `transition` and emits its progress event, then an error event
    /// for a failure and a complete event once the pipeline is terminal.
    pub async fn apply(
        &self,
        id: PipelineId,
        transition: Transition,
        emitter: &RunEmitter,
    ) -> Result<Pipeline> {
        let mut pipelines = self.pipelines.write().await;
        let pipeline = pipelines
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("pipeline {}", id)))?;

        let at = Utc::now();
        pipeline.apply(&transition, at)?;
        debug!(pipeline_id = %id, ?transition, status = pipeline.status_str(), "transition applied");

        let label = pipeline.label();
        emitter.emit(StreamEvent::progress(pipeline, &transition, at));
        if let Some(error) = transition.error() {
            emitter.emit(StreamEvent::error(error, Some(&label)));
        }
        if pipeline.is_terminal() {
            info!(
                pipeline_id = %id,
                status = pipeline.status_str(),
                "pipeline finished"
            );
            emitter.emit(StreamEvent::pipeline_complete(pipeline));
        }

        Ok(pipeline.clone())
    }

    /// Records one line of job output and streams it.
    pub async fn append_output(
        &self,
        id: PipelineId,
        line: impl Into<String>,
        emitter: &RunEmitter,
    ) -> Result<()> {
        let line = line.into();
        let mut pipelines = self.pipelines.write().await;
        let pipeline = pipelines
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("pipeline {}", id)))?;
        emitter.emit(StreamEvent::output(line.clone(), Some(&pipeline.label())));
        pipeline.push_output(line);
        Ok(())
    }

    /// Drops terminal pipelines that finished before `cutoff` and returns
    /// their ids.
    pub async fn evict_finished_before(&self, cutoff: chrono::DateTime<Utc>) -> Vec<PipelineId> {
        let mut pipelines = self.pipelines.write().await;
        let expired: Vec<PipelineId> = pipelines
            .iter()
            .filter(|(_, p)| p.completed_at().is_some_and(|done| done < cutoff))
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            pipelines.remove(id);
        }
        expired
    }
}
