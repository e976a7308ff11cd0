use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{PipelineId, RunId};
use super::pipeline::{MetricsStatus, Pipeline, Transition};
use crate::error::Result;

/// One unit of the progress protocol. Serialized as
/// `{"type": "...", "data": ...}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Output {
        data: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        keyword: Option<String>,
    },
    Error {
        data: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        keyword: Option<String>,
    },
    Progress {
        data: ProgressData,
    },
    Complete {
        data: CompletionData,
    },
}

impl StreamEvent {
    pub fn output(data: impl Into<String>, keyword: Option<&str>) -> Self {
        StreamEvent::Output {
            data: data.into(),
            keyword: keyword.map(str::to_string),
        }
    }

    pub fn error(data: impl Into<String>, keyword: Option<&str>) -> Self {
        StreamEvent::Error {
            data: data.into(),
            keyword: keyword.map(str::to_string),
        }
    }

    /// Renders a transition that was just applied to `pipeline`.
    pub fn progress(pipeline: &Pipeline, transition: &Transition, at: DateTime<Utc>) -> Self {
        StreamEvent::Progress {
            data: ProgressData::for_transition(pipeline, transition, at),
        }
    }

    /// Announces a freshly registered pipeline.
    pub fn registered(pipeline: &Pipeline) -> Self {
        StreamEvent::Progress {
            data: ProgressData {
                keyword: pipeline.label(),
                status: pipeline.status_str().to_string(),
                pipeline_id: Some(pipeline.id()),
                step: None,
                error: None,
                output_count: None,
                progress: Some(pipeline.progress()),
                at: Some(pipeline.created_at()),
            },
        }
    }

    /// Terminal event for one keyword's pipeline.
    pub fn pipeline_complete(pipeline: &Pipeline) -> Self {
        StreamEvent::Complete {
            data: CompletionData {
                success: pipeline.is_success(),
                keyword: Some(pipeline.label()),
                pipeline_id: Some(pipeline.id()),
                error: pipeline.error().map(str::to_string),
                summary: None,
            },
        }
    }

    /// Final event of a run.
    pub fn run_complete(summary: RunSummary) -> Self {
        StreamEvent::Complete {
            data: CompletionData {
                success: summary.succeeded == summary.total && !summary.cancelled,
                keyword: None,
                pipeline_id: None,
                error: None,
                summary: Some(summary),
            },
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            StreamEvent::Output { .. } => "output",
            StreamEvent::Error { .. } => "error",
            StreamEvent::Progress { .. } => "progress",
            StreamEvent::Complete { .. } => "complete",
        }
    }

    pub fn keyword(&self) -> Option<&str> {
        match self {
            StreamEvent::Output { keyword, .. } | StreamEvent::Error { keyword, .. } => {
                keyword.as_deref()
            }
            StreamEvent::Progress { data } => Some(&data.keyword),
            StreamEvent::Complete { data } => data.keyword.as_deref(),
        }
    }

    /// True only for the run-level summary, the last event of a session.
    pub fn is_run_complete(&self) -> bool {
        matches!(self, StreamEvent::Complete { data } if data.summary.is_some())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressData {
    pub keyword: String,
    /// Step status when `step` is set, otherwise the pipeline status.
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_id: Option<PipelineId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at: Option<DateTime<Utc>>,
}

impl ProgressData {
    pub fn for_transition(pipeline: &Pipeline, transition: &Transition, at: DateTime<Utc>) -> Self {
        let (status, output_count) = match transition {
            Transition::Start => ("running".to_string(), None),
            Transition::StepStarted { .. } => ("running".to_string(), None),
            Transition::StepCompleted { output_count, .. } => {
                ("completed".to_string(), *output_count)
            }
            Transition::StepFailed { .. } | Transition::Fail { .. } => ("failed".to_string(), None),
            Transition::Advance { status } => (status.as_str().to_string(), None),
        };

        Self {
            keyword: pipeline.label(),
            status,
            pipeline_id: Some(pipeline.id()),
            step: transition.step().map(str::to_string),
            error: transition.error().map(str::to_string),
            output_count,
            progress: Some(pipeline.progress()),
            at: Some(at),
        }
    }

    /// Recovers the transition this event was rendered from. Registration
    /// events carry no transition.
    pub fn transition(&self) -> Option<Transition> {
        match (self.step.as_ref(), self.status.as_str()) {
            (Some(step), "running") => Some(Transition::StepStarted { step: step.clone() }),
            (Some(step), "completed") => Some(Transition::StepCompleted {
                step: step.clone(),
                output_count: self.output_count,
            }),
            (Some(step), "failed") => Some(Transition::StepFailed {
                step: step.clone(),
                error: self.error.clone().unwrap_or_default(),
            }),
            (Some(_), _) => None,
            (None, "pending") => None,
            (None, "running") => Some(Transition::Start),
            (None, "failed") => Some(Transition::Fail {
                error: self.error.clone().unwrap_or_default(),
            }),
            (None, other) => MetricsStatus::parse(other).map(|status| Transition::Advance { status }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompletionData {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyword: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_id: Option<PipelineId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<RunSummary>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Discovery,
    Metrics,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: RunId,
    pub kind: RunKind,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Pipelines that never reached a terminal state, e.g. after a cancel.
    pub skipped: usize,
    pub cancelled: bool,
    pub pipelines: Vec<PipelineOutcome>,
}

impl RunSummary {
    pub fn from_pipelines(run_id: RunId, kind: RunKind, pipelines: &[Pipeline], cancelled: bool) -> Self {
        let outcomes: Vec<PipelineOutcome> = pipelines
            .iter()
            .map(|p| PipelineOutcome {
                keyword: p.label(),
                pipeline_id: p.id(),
                status: p.status_str().to_string(),
                error: p.error().map(str::to_string),
            })
            .collect();
        let succeeded = pipelines.iter().filter(|p| p.is_success()).count();
        let skipped = pipelines.iter().filter(|p| !p.is_terminal()).count();

        Self {
            run_id,
            kind,
            total: pipelines.len(),
            succeeded,
            failed: pipelines.len() - succeeded - skipped,
            skipped,
            cancelled,
            pipelines: outcomes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PipelineOutcome {
    pub keyword: String,
    pub pipeline_id: PipelineId,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Rebuilds a pipeline from its initial snapshot and the events captured
/// for it. Events belonging to other pipelines of the same run are skipped.
pub fn replay(initial: &Pipeline, events: &[StreamEvent]) -> Result<Pipeline> {
    let mut pipeline = initial.clone();
    let id = pipeline.id();
    let label = pipeline.label();

    for event in events {
        match event {
            StreamEvent::Progress { data } if data.pipeline_id == Some(id) => {
                if let Some(transition) = data.transition() {
                    let at = data.at.unwrap_or_else(|| pipeline.created_at());
                    pipeline.apply(&transition, at)?;
                }
            }
            StreamEvent::Output {
                data,
                keyword: Some(keyword),
            } if *keyword == label => pipeline.push_output(data.clone()),
            _ => {}
        }
    }

    Ok(pipeline)
}
