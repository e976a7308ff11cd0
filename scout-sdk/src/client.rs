//! HTTP client implementation
//!
//! Run submissions open a streaming response that is handed to a
//! [`RunStream`]. Status reads go through the shared retry engine.

use crate::config::SdkConfig;
use crate::error::{SdkError, SdkResult};
use crate::stream::RunStream;
use reqwest::{header, Client};
use scout_core::{Pipeline, PipelineId};
use scout_workflow::resilience::{fetch_json_with_retry, RetryOptions, TransportError};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Client for the pipeline-run API
#[derive(Debug, Clone)]
pub struct ScoutClient {
    client: Client,
    config: Arc<SdkConfig>,
}

impl ScoutClient {
    /// Create a new client with the given configuration
    pub fn new(config: SdkConfig) -> SdkResult<Self> {
        config.validate()?;

        let mut headers = header::HeaderMap::new();
        for (name, value) in &config.custom_headers {
            if let (Ok(name), Ok(value)) = (
                header::HeaderName::try_from(name.as_str()),
                header::HeaderValue::try_from(value.as_str()),
            ) {
                headers.insert(name, value);
            }
        }

        // No overall timeout: run streams stay open for the whole run.
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            config: Arc::new(config),
        })
    }

    /// Get a reference to the configuration
    pub fn config(&self) -> &SdkConfig {
        &self.config
    }

    /// Build the full URL for an endpoint
    pub fn url(&self, path: &str) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{}/{}", base, path)
    }

    /// Start a discovery run, one pipeline per keyword.
    pub async fn start_discovery<S: AsRef<str>>(&self, keywords: &[S]) -> SdkResult<RunStream> {
        let keywords: Vec<&str> = keywords.iter().map(AsRef::as_ref).collect();
        self.open_run("pipeline/discovery", json!({ "keywords": keywords.join("\n") }))
            .await
    }

    /// Start a metrics run over the given handles.
    pub async fn start_metrics<S: AsRef<str>>(&self, handles: &[S]) -> SdkResult<RunStream> {
        let handles: Vec<&str> = handles.iter().map(AsRef::as_ref).collect();
        self.open_run("pipeline/metrics", json!({ "handles": handles }))
            .await
    }

    #[instrument(skip(self, body))]
    async fn open_run(&self, path: &str, body: Value) -> SdkResult<RunStream> {
        let response = self
            .client
            .post(self.url(path))
            .header(header::ACCEPT, "text/event-stream")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await?;
            return Err(SdkError::from_response(status.as_u16(), &text));
        }

        let is_event_stream = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("text/event-stream"));
        if !is_event_stream {
            return Err(SdkError::Protocol(
                "run submission did not answer with an event stream".to_string(),
            ));
        }

        info!("run stream opened");
        Ok(RunStream::from_body(response.bytes_stream()))
    }

    fn retry_options(&self) -> RetryOptions<TransportError> {
        RetryOptions::new()
            .with_max_retries(self.config.max_retries)
            .with_initial_delay(self.config.retry_initial_backoff)
            .with_max_delay(self.config.retry_max_backoff)
    }

    /// Current snapshot of a pipeline. Transient failures are retried.
    #[instrument(skip(self))]
    pub async fn get_pipeline(&self, id: PipelineId) -> SdkResult<Pipeline> {
        let url = self.url("pipeline");
        let id = id.to_string();
        fetch_json_with_retry(&self.retry_options(), || {
            self.client
                .get(&url)
                .query(&[("pipelineId", id.as_str())])
                .timeout(self.config.timeout)
        })
        .await
        .into_result()
        .map_err(SdkError::from)
    }

    /// Poll every `interval` until the pipeline reaches a terminal state.
    pub async fn poll_until_terminal(
        &self,
        id: PipelineId,
        interval: Duration,
    ) -> SdkResult<Pipeline> {
        loop {
            let pipeline = self.get_pipeline(id).await?;
            if pipeline.is_terminal() {
                return Ok(pipeline);
            }
            debug!(
                pipeline_id = %id,
                status = pipeline.status_str(),
                progress = pipeline.progress(),
                "pipeline still running"
            );
            tokio::time::sleep(interval).await;
        }
    }

    /// [`ScoutClient::poll_until_terminal`] at the configured interval.
    pub async fn wait_for(&self, id: PipelineId) -> SdkResult<Pipeline> {
        self.poll_until_terminal(id, self.config.poll_interval).await
    }
}
