#![allow(dead_code)]

use async_trait::async_trait;
use scout_core::StreamEvent;
use scout_workflow::resilience::TransportError;
use scout_workflow::{
    DriverSettings, InMemoryResultSink, JobOutput, JobRequest, RetrySettings, RunDriver,
    ScrapeProvider,
};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

pub enum Reply {
    Ok(JobOutput),
    Err(TransportError),
    /// Never resolves.
    Hang,
    Delayed(Duration, JobOutput),
}

/// Provider answering from per-actor queues. An empty queue answers with an
/// empty job output.
#[derive(Default)]
pub struct ScriptedProvider {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<JobRequest>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, actor: &str, reply: Reply) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(actor.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    pub fn calls(&self) -> Vec<JobRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, actor: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.actor == actor)
            .count()
    }
}

#[async_trait]
impl ScrapeProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn run_job(&self, request: &JobRequest) -> Result<JobOutput, TransportError> {
        self.calls.lock().unwrap().push(request.clone());
        let reply = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&request.actor)
            .and_then(VecDeque::pop_front);

        match reply {
            None => Ok(JobOutput::default()),
            Some(Reply::Ok(output)) => Ok(output),
            Some(Reply::Err(err)) => Err(err),
            Some(Reply::Hang) => std::future::pending().await,
            Some(Reply::Delayed(delay, output)) => {
                tokio::time::sleep(delay).await;
                Ok(output)
            }
        }
    }
}

pub fn posts(owners: &[&str]) -> JobOutput {
    JobOutput {
        log: vec![format!("found {} posts", owners.len())],
        items: owners
            .iter()
            .map(|o| json!({"ownerUsername": o, "likesCount": 10, "commentsCount": 1}))
            .collect(),
    }
}

pub fn profiles(names: &[&str]) -> JobOutput {
    JobOutput {
        log: vec![format!("scraped {} profiles", names.len())],
        items: names
            .iter()
            .map(|n| json!({"username": n, "followersCount": 1000}))
            .collect::<Vec<Value>>(),
    }
}

pub fn server_error() -> TransportError {
    TransportError::Status {
        status: 503,
        body: "busy".into(),
    }
}

pub fn fast_settings() -> DriverSettings {
    DriverSettings {
        retry: RetrySettings {
            max_retries: 2,
            initial_delay_ms: 10,
            backoff_factor: 2.0,
            ..Default::default()
        },
        step_timeout_secs: 5,
        ..Default::default()
    }
}

pub fn driver(provider: Arc<ScriptedProvider>) -> (RunDriver, InMemoryResultSink) {
    let sink = InMemoryResultSink::new();
    let driver = RunDriver::new(provider, Arc::new(sink.clone()), fast_settings());
    (driver, sink)
}

pub async fn drain(events: &mut UnboundedReceiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut out = Vec::new();
    while let Some(event) = events.recv().await {
        out.push(event);
    }
    out
}
