use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::PipelineId;
use crate::error::{CoreError, Result};

pub const STEP_SEARCH_POSTS: &str = "search_posts";
pub const STEP_SCRAPE_PROFILES: &str = "scrape_profiles";
pub const STEP_SAVE_PROFILES: &str = "save_profiles";

// ===== Steps =====

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    /// Calls the scraping provider.
    Search,
    Scrape,
    /// Local write to the result sink.
    Persist,
}

/// One ordered unit of work inside a discovery pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStep {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub step_type: StepType,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_count: Option<usize>,
}

impl PipelineStep {
    pub fn new(id: impl Into<String>, name: impl Into<String>, step_type: StepType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            step_type,
            status: StepStatus::Pending,
            error: None,
            output_count: None,
        }
    }

    fn start(&mut self) -> Result<()> {
        if self.status != StepStatus::Pending {
            return Err(CoreError::InvalidState(format!(
                "step {} cannot start from {}",
                self.id, self.status
            )));
        }
        self.status = StepStatus::Running;
        Ok(())
    }

    fn complete(&mut self, output_count: Option<usize>) -> Result<()> {
        if self.status != StepStatus::Running {
            return Err(CoreError::InvalidState(format!(
                "step {} cannot complete from {}",
                self.id, self.status
            )));
        }
        self.status = StepStatus::Completed;
        self.output_count = output_count;
        Ok(())
    }

    fn fail(&mut self, error: &str) -> Result<()> {
        if self.status != StepStatus::Running {
            return Err(CoreError::InvalidState(format!(
                "step {} cannot fail from {}",
                self.id, self.status
            )));
        }
        self.status = StepStatus::Failed;
        self.error = Some(error.to_string());
        Ok(())
    }
}

// ===== Transitions =====

/// A single state change. The registry applies these and renders each one
/// into a progress event, so a captured event log can rebuild a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Start,
    StepStarted { step: String },
    StepCompleted { step: String, output_count: Option<usize> },
    StepFailed { step: String, error: String },
    Advance { status: MetricsStatus },
    Fail { error: String },
}

impl Transition {
    pub fn step(&self) -> Option<&str> {
        match self {
            Transition::StepStarted { step }
            | Transition::StepCompleted { step, .. }
            | Transition::StepFailed { step, .. } => Some(step),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Transition::StepFailed { error, .. } | Transition::Fail { error } => Some(error),
            _ => None,
        }
    }
}

// ===== Discovery pipeline =====

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl DiscoveryStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DiscoveryStatus::Completed | DiscoveryStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoveryStatus::Pending => "pending",
            DiscoveryStatus::Running => "running",
            DiscoveryStatus::Completed => "completed",
            DiscoveryStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryPipeline {
    pub id: PipelineId,
    pub keyword: String,
    pub status: DiscoveryStatus,
    pub steps: Vec<PipelineStep>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub output: Vec<String>,
}

impl DiscoveryPipeline {
    pub fn new(keyword: impl Into<String>, steps: Vec<PipelineStep>) -> Result<Self> {
        if steps.is_empty() {
            return Err(CoreError::Validation(
                "a discovery pipeline needs at least one step".to_string(),
            ));
        }
        Ok(Self {
            id: PipelineId::new(),
            keyword: keyword.into(),
            status: DiscoveryStatus::Pending,
            steps,
            created_at: Utc::now(),
            completed_at: None,
            error: None,
            output: Vec::new(),
        })
    }

    /// Search, scrape, save.
    pub fn standard(keyword: impl Into<String>) -> Self {
        Self {
            id: PipelineId::new(),
            keyword: keyword.into(),
            status: DiscoveryStatus::Pending,
            steps: vec![
                PipelineStep::new(STEP_SEARCH_POSTS, "Search posts", StepType::Search),
                PipelineStep::new(STEP_SCRAPE_PROFILES, "Scrape profiles", StepType::Scrape),
                PipelineStep::new(STEP_SAVE_PROFILES, "Save profiles", StepType::Persist),
            ],
            created_at: Utc::now(),
            completed_at: None,
            error: None,
            output: Vec::new(),
        }
    }

    pub fn step(&self, id: &str) -> Option<&PipelineStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Pipeline status as a function of its steps. `started` distinguishes a
    /// pipeline that has begun but not yet touched a step.
    pub fn derive_status(steps: &[PipelineStep], started: bool) -> DiscoveryStatus {
        if steps.iter().any(|s| s.status == StepStatus::Failed) {
            DiscoveryStatus::Failed
        } else if steps.iter().all(|s| s.status == StepStatus::Completed) {
            DiscoveryStatus::Completed
        } else if !started && steps.iter().all(|s| s.status == StepStatus::Pending) {
            DiscoveryStatus::Pending
        } else {
            DiscoveryStatus::Running
        }
    }

    pub fn progress(&self) -> u8 {
        let done = self
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count();
        ((done * 100) / self.steps.len().max(1)) as u8
    }

    fn apply(&mut self, transition: &Transition, at: DateTime<Utc>) -> Result<()> {
        if self.status.is_terminal() {
            return Err(CoreError::InvalidState(format!(
                "pipeline {} is already {}",
                self.id,
                self.status.as_str()
            )));
        }

        match transition {
            Transition::Start => {
                if self.status != DiscoveryStatus::Pending {
                    return Err(CoreError::InvalidState(format!(
                        "pipeline {} already started",
                        self.id
                    )));
                }
            }
            Transition::StepStarted { step } => {
                let index = self.step_index(step)?;
                if let Some(blocking) = self.steps[..index]
                    .iter()
                    .find(|s| s.status != StepStatus::Completed)
                {
                    return Err(CoreError::InvalidState(format!(
                        "step {} cannot start before {} completes",
                        step, blocking.id
                    )));
                }
                self.steps[index].start()?;
            }
            Transition::StepCompleted { step, output_count } => {
                let index = self.step_index(step)?;
                self.steps[index].complete(*output_count)?;
            }
            Transition::StepFailed { step, error } => {
                let index = self.step_index(step)?;
                self.steps[index].fail(error)?;
                self.error = Some(error.clone());
            }
            Transition::Advance { .. } | Transition::Fail { .. } => {
                return Err(CoreError::InvalidState(format!(
                    "{:?} does not apply to a discovery pipeline",
                    transition
                )));
            }
        }

        self.status = Self::derive_status(&self.steps, true);
        if self.status.is_terminal() {
            self.completed_at = Some(at);
        }
        Ok(())
    }

    fn step_index(&self, id: &str) -> Result<usize> {
        self.steps
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| CoreError::NotFound(format!("step {} in pipeline {}", id, self.id)))
    }
}

// ===== Metrics pipeline =====

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MetricsStatus {
    Pending,
    ScrapingPosts,
    ReducingMetrics,
    SavingProfiles,
    Completed,
    Failed,
}

impl MetricsStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, MetricsStatus::Completed | MetricsStatus::Failed)
    }

    /// Fixed percentage per stage. Never interpolated.
    pub fn progress(&self) -> u8 {
        match self {
            MetricsStatus::Pending => 0,
            MetricsStatus::ScrapingPosts => 25,
            MetricsStatus::ReducingMetrics => 50,
            MetricsStatus::SavingProfiles => 75,
            MetricsStatus::Completed => 100,
            MetricsStatus::Failed => 0,
        }
    }

    /// The only status a successful advance may move to.
    pub fn next(&self) -> Option<MetricsStatus> {
        match self {
            MetricsStatus::Pending => Some(MetricsStatus::ScrapingPosts),
            MetricsStatus::ScrapingPosts => Some(MetricsStatus::ReducingMetrics),
            MetricsStatus::ReducingMetrics => Some(MetricsStatus::SavingProfiles),
            MetricsStatus::SavingProfiles => Some(MetricsStatus::Completed),
            MetricsStatus::Completed | MetricsStatus::Failed => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricsStatus::Pending => "pending",
            MetricsStatus::ScrapingPosts => "scraping_posts",
            MetricsStatus::ReducingMetrics => "reducing_metrics",
            MetricsStatus::SavingProfiles => "saving_profiles",
            MetricsStatus::Completed => "completed",
            MetricsStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(MetricsStatus::Pending),
            "scraping_posts" => Some(MetricsStatus::ScrapingPosts),
            "reducing_metrics" => Some(MetricsStatus::ReducingMetrics),
            "saving_profiles" => Some(MetricsStatus::SavingProfiles),
            "completed" => Some(MetricsStatus::Completed),
            "failed" => Some(MetricsStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for MetricsStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricsPipeline {
    pub id: PipelineId,
    pub handles: Vec<String>,
    pub status: MetricsStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub output: Vec<String>,
}

impl MetricsPipeline {
    pub fn new(handles: Vec<String>) -> Self {
        Self {
            id: PipelineId::new(),
            handles,
            status: MetricsStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
            error: None,
            output: Vec::new(),
        }
    }

    /// Label used as the `keyword` of this pipeline's stream events.
    pub fn label(&self) -> String {
        self.handles.join(",")
    }

    fn apply(&mut self, transition: &Transition, at: DateTime<Utc>) -> Result<()> {
        if self.status.is_terminal() {
            return Err(CoreError::InvalidState(format!(
                "pipeline {} is already {}",
                self.id, self.status
            )));
        }

        match transition {
            Transition::Advance { status } => {
                if self.status.next() != Some(*status) {
                    return Err(CoreError::InvalidState(format!(
                        "metrics pipeline cannot move from {} to {}",
                        self.status, status
                    )));
                }
                self.status = *status;
            }
            Transition::Fail { error } => {
                self.status = MetricsStatus::Failed;
                self.error = Some(error.clone());
            }
            other => {
                return Err(CoreError::InvalidState(format!(
                    "{:?} does not apply to a metrics pipeline",
                    other
                )));
            }
        }

        if self.status.is_terminal() {
            self.completed_at = Some(at);
        }
        Ok(())
    }
}

// ===== Pipeline =====

/// Snapshot returned by the status contract. Each variant keeps its own
/// status vocabulary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Pipeline {
    Discovery(DiscoveryPipeline),
    Metrics(MetricsPipeline),
}

impl Pipeline {
    pub fn id(&self) -> PipelineId {
        match self {
            Pipeline::Discovery(p) => p.id,
            Pipeline::Metrics(p) => p.id,
        }
    }

    pub fn label(&self) -> String {
        match self {
            Pipeline::Discovery(p) => p.keyword.clone(),
            Pipeline::Metrics(p) => p.label(),
        }
    }

    pub fn status_str(&self) -> &'static str {
        match self {
            Pipeline::Discovery(p) => p.status.as_str(),
            Pipeline::Metrics(p) => p.status.as_str(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        match self {
            Pipeline::Discovery(p) => p.status.is_terminal(),
            Pipeline::Metrics(p) => p.status.is_terminal(),
        }
    }

    pub fn is_success(&self) -> bool {
        match self {
            Pipeline::Discovery(p) => p.status == DiscoveryStatus::Completed,
            Pipeline::Metrics(p) => p.status == MetricsStatus::Completed,
        }
    }

    pub fn progress(&self) -> u8 {
        match self {
            Pipeline::Discovery(p) => p.progress(),
            Pipeline::Metrics(p) => p.status.progress(),
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            Pipeline::Discovery(p) => p.created_at,
            Pipeline::Metrics(p) => p.created_at,
        }
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Pipeline::Discovery(p) => p.completed_at,
            Pipeline::Metrics(p) => p.completed_at,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Pipeline::Discovery(p) => p.error.as_deref(),
            Pipeline::Metrics(p) => p.error.as_deref(),
        }
    }

    pub fn output(&self) -> &[String] {
        match self {
            Pipeline::Discovery(p) => &p.output,
            Pipeline::Metrics(p) => &p.output,
        }
    }

    pub fn push_output(&mut self, line: impl Into<String>) {
        match self {
            Pipeline::Discovery(p) => p.output.push(line.into()),
            Pipeline::Metrics(p) => p.output.push(line.into()),
        }
    }

    /// Applies one transition. Rejected transitions leave the pipeline
    /// untouched.
    pub fn apply(&mut self, transition: &Transition, at: DateTime<Utc>) -> Result<()> {
        match self {
            Pipeline::Discovery(p) => {
                let mut next = p.clone();
                next.apply(transition, at)?;
                *p = next;
            }
            Pipeline::Metrics(p) => p.apply(transition, at)?,
        }
        Ok(())
    }
}

impl From<DiscoveryPipeline> for Pipeline {
    fn from(pipeline: DiscoveryPipeline) -> Self {
        Pipeline::Discovery(pipeline)
    }
}

impl From<MetricsPipeline> for Pipeline {
    fn from(pipeline: MetricsPipeline) -> Self {
        Pipeline::Metrics(pipeline)
    }
}
