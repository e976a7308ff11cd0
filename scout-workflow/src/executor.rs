//! Run driver.
//!
//! A run owns one pipeline per keyword (discovery) or a single pipeline for
//! the whole handle list (metrics). Pipelines run one after another inside a
//! spawned task; a failed pipeline does not stop its siblings. Every provider
//! call goes through the shared circuit breaker, which wraps a retry loop
//! whose attempts are each raced against the step deadline.
//!
//! Cancelling the session token, or dropping the event receiver, stops the
//! in-flight step, marks the current pipeline failed and skips the rest.

use chrono::Utc;
use scout_core::{
    DiscoveryPipeline, MetricsPipeline, MetricsStatus, Pipeline, PipelineId, RunId, RunKind,
    RunPlan, RunSummary, StreamEvent, Transition, STEP_SAVE_PROFILES, STEP_SCRAPE_PROFILES,
    STEP_SEARCH_POSTS,
};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::engine::{PipelineRegistry, RunEmitter};
use crate::error::{RunError, RunResult};
use crate::provider::{JobOutput, JobRequest, ScrapeProvider};
use crate::reduce::{item_owner, post_owners, reduce_post_metrics};
use crate::resilience::{run_with_retry_timeout, CircuitBreaker, TransportError};
use crate::settings::DriverSettings;
use crate::sink::{ResultSink, SinkRecord};

/// Handle on one started run.
#[derive(Debug)]
pub struct RunSession {
    pub run_id: RunId,
    pub kind: RunKind,
    pub pipeline_ids: Vec<PipelineId>,
    /// Ordered events. The channel closes after the run summary.
    pub events: mpsc::UnboundedReceiver<StreamEvent>,
    pub cancel: CancellationToken,
    pub handle: JoinHandle<RunSummary>,
}

impl RunSession {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

struct StepContext<'a> {
    id: PipelineId,
    label: String,
    emitter: &'a RunEmitter,
    cancel: &'a CancellationToken,
}

impl StepContext<'_> {
    fn is_abandoned(&self) -> bool {
        self.cancel.is_cancelled() || self.emitter.is_closed()
    }

    async fn abandoned(&self) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = self.emitter.closed() => {}
        }
    }
}

#[derive(Clone)]
pub struct RunDriver {
    registry: PipelineRegistry,
    provider: Arc<dyn ScrapeProvider>,
    sink: Arc<dyn ResultSink>,
    breaker: CircuitBreaker,
    settings: Arc<DriverSettings>,
}

impl RunDriver {
    pub fn new(
        provider: Arc<dyn ScrapeProvider>,
        sink: Arc<dyn ResultSink>,
        settings: DriverSettings,
    ) -> Self {
        let breaker = CircuitBreaker::new(provider.name(), settings.breaker.clone());
        Self {
            registry: PipelineRegistry::new(),
            provider,
            sink,
            breaker,
            settings: Arc::new(settings),
        }
    }

    /// Shares an existing breaker, e.g. between drivers for one provider.
    pub fn with_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn with_registry(mut self, registry: PipelineRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &PipelineRegistry {
        &self.registry
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn settings(&self) -> &DriverSettings {
        &self.settings
    }

    pub async fn get_status(&self, id: PipelineId) -> scout_core::Result<Pipeline> {
        self.registry.get_status(id).await
    }

    /// Forgets pipelines that finished before `cutoff`, along with the
    /// records the sink keeps for them. Returns how many pipelines went.
    pub async fn evict_finished_before(&self, cutoff: chrono::DateTime<Utc>) -> usize {
        let evicted = self.registry.evict_finished_before(cutoff).await;
        if !evicted.is_empty() {
            let records = self.sink.evict(&evicted).await;
            debug!(pipelines = evicted.len(), records, "evicted finished pipelines");
        }
        evicted.len()
    }

    /// Registers the run's pipelines, then drives them on a spawned task.
    pub async fn start(&self, job: RunPlan) -> RunSession {
        let run_id = RunId::new();
        let kind = job.kind();
        let (emitter, events) = RunEmitter::channel();
        let cancel = CancellationToken::new();

        let pipelines: Vec<Pipeline> = match job {
            RunPlan::Discovery { keywords } => keywords
                .into_iter()
                .map(|keyword| DiscoveryPipeline::standard(keyword).into())
                .collect(),
            RunPlan::Metrics { handles } => vec![MetricsPipeline::new(handles).into()],
        };

        let mut pipeline_ids = Vec::with_capacity(pipelines.len());
        for pipeline in pipelines {
            pipeline_ids.push(self.registry.register(pipeline, &emitter).await);
        }

        let span = info_span!("run", %run_id, ?kind);
        let handle = tokio::spawn(
            self.clone()
                .drive(run_id, kind, pipeline_ids.clone(), emitter, cancel.clone())
                .instrument(span),
        );

        RunSession {
            run_id,
            kind,
            pipeline_ids,
            events,
            cancel,
            handle,
        }
    }

    async fn drive(
        self,
        run_id: RunId,
        kind: RunKind,
        ids: Vec<PipelineId>,
        emitter: RunEmitter,
        cancel: CancellationToken,
    ) -> RunSummary {
        info!(pipelines = ids.len(), "run started");
        emitter.emit(StreamEvent::output(
            format!("Starting {} run for {} pipeline(s)", kind_name(kind), ids.len()),
            None,
        ));

        for id in &ids {
            let snapshot = match self.registry.get_status(*id).await {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    error!(pipeline_id = %id, error = %err, "pipeline vanished from registry");
                    continue;
                }
            };
            let ctx = StepContext {
                id: *id,
                label: snapshot.label(),
                emitter: &emitter,
                cancel: &cancel,
            };
            if ctx.is_abandoned() {
                break;
            }

            let result = match &snapshot {
                Pipeline::Discovery(p) => self.run_discovery(&ctx, &p.keyword).await,
                Pipeline::Metrics(p) => self.run_metrics(&ctx, &p.handles).await,
            };
            if let Err(err) = result {
                error!(pipeline_id = %id, error = %err, "pipeline bookkeeping failed");
            }
        }

        let cancelled = cancel.is_cancelled() || emitter.is_closed();
        let snapshots = self.registry.snapshots(&ids).await;
        let summary = RunSummary::from_pipelines(run_id, kind, &snapshots, cancelled);
        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            cancelled,
            "run finished"
        );
        emitter.emit(StreamEvent::run_complete(summary.clone()));
        summary
    }

    // ===== Discovery =====

    async fn run_discovery(&self, ctx: &StepContext<'_>, keyword: &str) -> RunResult<()> {
        self.registry
            .apply(ctx.id, Transition::Start, ctx.emitter)
            .await?;

        let search = JobRequest::new(
            self.settings.search_actor.clone(),
            json!({
                "hashtags": [keyword],
                "resultsLimit": self.settings.max_posts_per_keyword,
            }),
        );
        let owners = self
            .run_step(ctx, STEP_SEARCH_POSTS, async {
                let output = self.call_provider(ctx, search).await?;
                let owners = post_owners(&output.items);
                Ok::<_, RunError>((owners, output.items.len()))
            })
            .await?;
        let Some(owners) = owners else {
            return Ok(());
        };

        let profiles = self
            .run_step(ctx, STEP_SCRAPE_PROFILES, async {
                if owners.is_empty() {
                    return Ok::<_, RunError>((Vec::new(), 0));
                }
                let request = JobRequest::new(
                    self.settings.profile_actor.clone(),
                    json!({ "usernames": owners }),
                );
                let output = self.call_provider(ctx, request).await?;
                let count = output.items.len();
                Ok((output.items, count))
            })
            .await?;
        let Some(profiles) = profiles else {
            return Ok(());
        };

        self.run_step(ctx, STEP_SAVE_PROFILES, async {
            let records: Vec<SinkRecord> = profiles
                .into_iter()
                .filter_map(|profile| {
                    item_owner(&profile).map(|handle| SinkRecord {
                        handle,
                        kind: RunKind::Discovery,
                        keyword: Some(keyword.to_string()),
                        payload: profile,
                    })
                })
                .collect();
            let saved = self.sink.save(ctx.id, records).await?;
            self.registry
                .append_output(ctx.id, format!("Saved {} profile(s)", saved), ctx.emitter)
                .await?;
            Ok::<_, RunError>(((), saved))
        })
        .await?;

        Ok(())
    }

    /// Runs one discovery step. `Ok(None)` means the step failed and the
    /// failure is already recorded.
    async fn run_step<T, Fut>(
        &self,
        ctx: &StepContext<'_>,
        step: &str,
        work: Fut,
    ) -> RunResult<Option<T>>
    where
        Fut: Future<Output = RunResult<(T, usize)>>,
    {
        self.registry
            .apply(
                ctx.id,
                Transition::StepStarted {
                    step: step.to_string(),
                },
                ctx.emitter,
            )
            .await?;

        match self.guard(ctx, work).await {
            Ok((value, count)) => {
                self.registry
                    .apply(
                        ctx.id,
                        Transition::StepCompleted {
                            step: step.to_string(),
                            output_count: Some(count),
                        },
                        ctx.emitter,
                    )
                    .await?;
                Ok(Some(value))
            }
            Err(err) => {
                warn!(pipeline_id = %ctx.id, step, error = %err, "step failed");
                self.registry
                    .apply(
                        ctx.id,
                        Transition::StepFailed {
                            step: step.to_string(),
                            error: err.to_string(),
                        },
                        ctx.emitter,
                    )
                    .await?;
                Ok(None)
            }
        }
    }

    // ===== Metrics =====

    async fn run_metrics(&self, ctx: &StepContext<'_>, handles: &[String]) -> RunResult<()> {
        self.advance(ctx, MetricsStatus::ScrapingPosts).await?;
        let since = (Utc::now() - chrono::Duration::days(i64::from(self.settings.lookback_days)))
            .format("%Y-%m-%d")
            .to_string();
        let request = JobRequest::new(
            self.settings.post_actor.clone(),
            json!({ "usernames": handles, "onlyPostsNewerThan": since }),
        );
        let posts = match self.guard(ctx, self.call_provider(ctx, request)).await {
            Ok(output) => output.items,
            Err(err) => return self.fail(ctx, err).await,
        };

        if ctx.is_abandoned() {
            return self.fail(ctx, RunError::Cancelled).await;
        }
        self.advance(ctx, MetricsStatus::ReducingMetrics).await?;
        let metrics = reduce_post_metrics(handles, &posts);
        for m in &metrics {
            self.registry
                .append_output(
                    ctx.id,
                    format!(
                        "@{}: {} posts, avg {:.1} likes, {:.1} comments, {:.1} views",
                        m.handle, m.post_count, m.avg_likes, m.avg_comments, m.avg_views
                    ),
                    ctx.emitter,
                )
                .await?;
        }

        if ctx.is_abandoned() {
            return self.fail(ctx, RunError::Cancelled).await;
        }
        self.advance(ctx, MetricsStatus::SavingProfiles).await?;
        let save = async {
            let records = metrics
                .iter()
                .map(|m| -> Result<SinkRecord, serde_json::Error> {
                    Ok(SinkRecord {
                        handle: m.handle.clone(),
                        kind: RunKind::Metrics,
                        keyword: None,
                        payload: serde_json::to_value(m)?,
                    })
                })
                .collect::<Result<Vec<_>, serde_json::Error>>()
                .map_err(scout_core::CoreError::from)?;
            Ok::<_, RunError>(self.sink.save(ctx.id, records).await?)
        };
        match self.guard(ctx, save).await {
            Ok(saved) => {
                self.registry
                    .append_output(ctx.id, format!("Saved {} profile(s)", saved), ctx.emitter)
                    .await?;
            }
            Err(err) => return self.fail(ctx, err).await,
        }

        self.advance(ctx, MetricsStatus::Completed).await
    }

    async fn advance(&self, ctx: &StepContext<'_>, status: MetricsStatus) -> RunResult<()> {
        self.registry
            .apply(ctx.id, Transition::Advance { status }, ctx.emitter)
            .await?;
        Ok(())
    }

    async fn fail(&self, ctx: &StepContext<'_>, err: RunError) -> RunResult<()> {
        warn!(pipeline_id = %ctx.id, error = %err, "metrics pipeline failed");
        self.registry
            .apply(
                ctx.id,
                Transition::Fail {
                    error: err.to_string(),
                },
                ctx.emitter,
            )
            .await?;
        Ok(())
    }

    // ===== Provider access =====

    /// Races `work` against cancellation of the run.
    async fn guard<T, Fut>(&self, ctx: &StepContext<'_>, work: Fut) -> RunResult<T>
    where
        Fut: Future<Output = RunResult<T>>,
    {
        tokio::select! {
            biased;
            _ = ctx.abandoned() => Err(RunError::Cancelled),
            result = work => result,
        }
    }

    /// Breaker around retries around per-attempt deadlines. Each retry is
    /// reported as a non-fatal error event; job log lines become output.
    async fn call_provider(&self, ctx: &StepContext<'_>, request: JobRequest) -> RunResult<JobOutput> {
        let emitter = ctx.emitter.clone();
        let label = ctx.label.clone();
        let actor = request.actor.clone();
        let options = self
            .settings
            .retry
            .options::<TransportError>()
            .with_retry_condition(TransportError::is_retryable)
            .with_on_retry(move |err, attempt| {
                warn!(%actor, attempt, error = %err, "provider call failed, retrying");
                emitter.emit(StreamEvent::error(
                    format!("{} attempt {} failed: {}. Retrying", actor, attempt, err),
                    Some(&label),
                ));
            });

        let timeout = self.settings.step_timeout();
        let provider = &self.provider;
        let request = &request;
        let output = self
            .breaker
            .execute(|| async {
                run_with_retry_timeout(&options, timeout, || provider.run_job(request))
                    .await
                    .into_result()
            })
            .await
            .map_err(TransportError::from)?;

        for line in &output.log {
            self.registry
                .append_output(ctx.id, line.clone(), ctx.emitter)
                .await?;
        }
        Ok(output)
    }
}

fn kind_name(kind: RunKind) -> &'static str {
    match kind {
        RunKind::Discovery => "discovery",
        RunKind::Metrics => "metrics",
    }
}
