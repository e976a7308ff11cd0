//! Client for the hosted scraping service.
//!
//! The service is an opaque collaborator: a job names an actor and takes a
//! JSON input; the answer is the actor's log lines and the records it
//! produced. A provider makes exactly one attempt per call. Retry, deadline
//! and breaker are layered on by the run driver.

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

use crate::resilience::{send_classified, TransportError};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct JobRequest {
    pub actor: String,
    pub input: serde_json::Value,
}

impl JobRequest {
    pub fn new(actor: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            actor: actor.into(),
            input,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobOutput {
    #[serde(default)]
    pub log: Vec<String>,
    #[serde(default)]
    pub items: Vec<serde_json::Value>,
}

#[async_trait]
pub trait ScrapeProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn run_job(&self, request: &JobRequest) -> Result<JobOutput, TransportError>;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub base_url: String,
    pub api_token: Option<String>,
    pub connect_timeout_secs: u64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9000".to_string(),
            api_token: None,
            connect_timeout_secs: 10,
        }
    }
}

/// `POST {base_url}/actors/{actor}/runs` with the job input as body.
#[derive(Debug, Clone)]
pub struct HttpScrapeProvider {
    client: Client,
    settings: ProviderSettings,
}

impl HttpScrapeProvider {
    pub fn new(settings: ProviderSettings) -> Result<Self, TransportError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .user_agent(concat!("scout/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()?;

        Ok(Self { client, settings })
    }

    fn url(&self, actor: &str) -> String {
        format!(
            "{}/actors/{}/runs",
            self.settings.base_url.trim_end_matches('/'),
            actor
        )
    }
}

#[async_trait]
impl ScrapeProvider for HttpScrapeProvider {
    fn name(&self) -> &str {
        "scrape-provider"
    }

    #[instrument(skip(self, request), fields(actor = %request.actor))]
    async fn run_job(&self, request: &JobRequest) -> Result<JobOutput, TransportError> {
        let mut builder = self.client.post(self.url(&request.actor)).json(&request.input);
        if let Some(token) = &self.settings.api_token {
            builder = builder.bearer_auth(token);
        }

        let response = send_classified(builder).await?;
        let bytes = response.bytes().await?;
        let output: JobOutput = serde_json::from_slice(&bytes)?;
        debug!(items = output.items.len(), log_lines = output.log.len(), "job finished");
        Ok(output)
    }
}
