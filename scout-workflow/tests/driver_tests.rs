mod common;

use common::*;
use pretty_assertions::assert_eq;
use scout_core::*;
use scout_workflow::resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState, TransportError};
use scout_workflow::{InMemoryResultSink, RunDriver};
use std::sync::Arc;
use std::time::Duration;

fn discovery(keywords: &str) -> RunPlan {
    RunPlan::discovery(keywords, 10).unwrap()
}

fn progress_of(events: &[StreamEvent]) -> Vec<(String, Option<String>, String)> {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Progress { data } => {
                Some((data.keyword.clone(), data.step.clone(), data.status.clone()))
            }
            _ => None,
        })
        .collect()
}

fn complete_of(events: &[StreamEvent]) -> Vec<&CompletionData> {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Complete { data } => Some(data),
            _ => None,
        })
        .collect()
}

// ===== Discovery Runs =====

#[tokio::test(start_paused = true)]
async fn test_discovery_run_reports_every_step_in_order() {
    let provider = Arc::new(
        ScriptedProvider::new()
            .reply("hashtag-search", Reply::Ok(posts(&["alice", "bob", "alice"])))
            .reply("profile-scraper", Reply::Ok(profiles(&["alice", "bob"]))),
    );
    let (driver, sink) = driver(provider.clone());

    let mut session = driver.start(discovery("#coffee")).await;
    let events = drain(&mut session.events).await;
    let summary = session.handle.await.unwrap();

    let steps: Vec<_> = progress_of(&events)
        .into_iter()
        .map(|(_, step, status)| (step, status))
        .collect();
    assert_eq!(
        steps,
        vec![
            (None, "pending".to_string()),
            (None, "running".to_string()),
            (Some("search_posts".to_string()), "running".to_string()),
            (Some("search_posts".to_string()), "completed".to_string()),
            (Some("scrape_profiles".to_string()), "running".to_string()),
            (Some("scrape_profiles".to_string()), "completed".to_string()),
            (Some("save_profiles".to_string()), "running".to_string()),
            (Some("save_profiles".to_string()), "completed".to_string()),
        ]
    );

    let request = &provider.calls()[1];
    assert_eq!(request.input["usernames"], serde_json::json!(["alice", "bob"]));

    let completes = complete_of(&events);
    assert_eq!(completes.len(), 2);
    assert!(completes[0].success);
    assert_eq!(completes[0].keyword.as_deref(), Some("coffee"));
    assert!(events.last().unwrap().is_run_complete());

    assert_eq!(summary.succeeded, 1);
    assert_eq!(sink.records(session.pipeline_ids[0]).len(), 2);

    let snapshot = driver.get_status(session.pipeline_ids[0]).await.unwrap();
    assert_eq!(snapshot.status_str(), "completed");
    assert!(snapshot.output().contains(&"found 3 posts".to_string()));
    assert!(snapshot.output().contains(&"Saved 2 profile(s)".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_keyword_failure_is_isolated() {
    let provider = Arc::new(
        ScriptedProvider::new()
            .reply(
                "hashtag-search",
                Reply::Err(TransportError::Status {
                    status: 400,
                    body: "bad hashtag".into(),
                }),
            )
            .reply("hashtag-search", Reply::Ok(posts(&["carol"])))
            .reply("profile-scraper", Reply::Ok(profiles(&["carol"]))),
    );
    let (driver, _sink) = driver(provider.clone());

    let mut session = driver.start(discovery("bad\ngood")).await;
    let events = drain(&mut session.events).await;
    let summary = session.handle.await.unwrap();

    assert_eq!(summary.total, 2);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(provider.calls_to("hashtag-search"), 2);

    let bad = driver.get_status(session.pipeline_ids[0]).await.unwrap();
    let Pipeline::Discovery(bad) = bad else {
        panic!("expected discovery");
    };
    assert_eq!(bad.status, DiscoveryStatus::Failed);
    assert_eq!(bad.steps[0].status, StepStatus::Failed);
    assert_eq!(bad.steps[1].status, StepStatus::Pending);
    assert_eq!(bad.steps[2].status, StepStatus::Pending);

    let errors: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, StreamEvent::Error { keyword: Some(k), .. } if k == "bad"))
        .collect();
    assert_eq!(errors.len(), 1);

    let completes = complete_of(&events);
    assert_eq!(completes[0].keyword.as_deref(), Some("bad"));
    assert!(!completes[0].success);
    assert_eq!(completes[1].keyword.as_deref(), Some("good"));
    assert!(completes[1].success);
}

#[tokio::test(start_paused = true)]
async fn test_retries_surface_as_non_fatal_errors() {
    let provider = Arc::new(
        ScriptedProvider::new()
            .reply("hashtag-search", Reply::Err(server_error()))
            .reply("hashtag-search", Reply::Ok(posts(&[]))),
    );
    let (driver, _sink) = driver(provider.clone());

    let mut session = driver.start(discovery("coffee")).await;
    let events = drain(&mut session.events).await;

    let errors: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Error { data, .. } => Some(data.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("attempt 1"));
    assert!(complete_of(&events)[0].success);
    assert_eq!(provider.calls_to("profile-scraper"), 0);
}

// ===== Metrics Runs =====

#[tokio::test(start_paused = true)]
async fn test_metrics_run_walks_progress_table() {
    let provider = Arc::new(ScriptedProvider::new().reply(
        "post-scraper",
        Reply::Ok(posts(&["alice", "alice", "bob"])),
    ));
    let (driver, sink) = driver(provider.clone());

    let job = RunPlan::metrics(&["@Alice", "bob"], 10).unwrap();
    let mut session = driver.start(job).await;
    let events = drain(&mut session.events).await;

    let progress: Vec<(String, Option<u8>)> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Progress { data } => Some((data.status.clone(), data.progress)),
            _ => None,
        })
        .collect();
    assert_eq!(
        progress,
        vec![
            ("pending".to_string(), Some(0)),
            ("scraping_posts".to_string(), Some(25)),
            ("reducing_metrics".to_string(), Some(50)),
            ("saving_profiles".to_string(), Some(75)),
            ("completed".to_string(), Some(100)),
        ]
    );

    let request = &provider.calls()[0];
    assert_eq!(request.input["usernames"], serde_json::json!(["alice", "bob"]));
    assert!(request.input["onlyPostsNewerThan"].is_string());

    let records = sink.records(session.pipeline_ids[0]);
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].payload["postCount"], 2);
    assert_eq!(records[0].payload["avgLikes"], 10.0);
}

#[tokio::test(start_paused = true)]
async fn test_metrics_failure_marks_pipeline_failed() {
    let provider = Arc::new(
        ScriptedProvider::new()
            .reply("post-scraper", Reply::Err(server_error()))
            .reply("post-scraper", Reply::Err(server_error()))
            .reply("post-scraper", Reply::Err(server_error())),
    );
    let (driver, _sink) = driver(provider.clone());

    let mut session = driver.start(RunPlan::metrics(&["alice"], 10).unwrap()).await;
    let events = drain(&mut session.events).await;

    assert_eq!(provider.calls_to("post-scraper"), 3);
    let snapshot = driver.get_status(session.pipeline_ids[0]).await.unwrap();
    assert_eq!(snapshot.status_str(), "failed");
    assert!(snapshot.error().unwrap().contains("503"));
    assert!(!complete_of(&events)[0].success);
}

// ===== Cancellation =====

#[tokio::test(start_paused = true)]
async fn test_cancel_fails_running_step_and_skips_the_rest() {
    let provider = Arc::new(
        ScriptedProvider::new()
            .reply("hashtag-search", Reply::Ok(posts(&["alice"])))
            .reply("profile-scraper", Reply::Hang),
    );
    let (driver, _sink) = driver(provider.clone());

    let mut session = driver.start(discovery("first\nsecond")).await;
    loop {
        let event = session.events.recv().await.unwrap();
        if let StreamEvent::Progress { data } = &event {
            if data.step.as_deref() == Some(STEP_SCRAPE_PROFILES) && data.status == "running" {
                break;
            }
        }
    }
    session.cancel();
    session.cancel();

    let events = drain(&mut session.events).await;
    let summary = session.handle.await.unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(provider.calls_to("hashtag-search"), 1);

    let Pipeline::Discovery(first) = driver.get_status(session.pipeline_ids[0]).await.unwrap() else {
        panic!("expected discovery");
    };
    assert_eq!(first.status, DiscoveryStatus::Failed);
    assert_eq!(first.error.as_deref(), Some("run cancelled"));
    assert_eq!(first.steps[2].status, StepStatus::Pending);

    let second = driver.get_status(session.pipeline_ids[1]).await.unwrap();
    assert_eq!(second.status_str(), "pending");

    let StreamEvent::Complete { data } = events.last().unwrap() else {
        panic!("expected run summary last");
    };
    assert!(!data.success);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_receiver_stops_the_run() {
    let provider = Arc::new(ScriptedProvider::new().reply("post-scraper", Reply::Hang));
    let (driver, _sink) = driver(provider.clone());

    let mut session = driver.start(RunPlan::metrics(&["alice"], 10).unwrap()).await;
    let id = session.pipeline_ids[0];
    loop {
        match session.events.recv().await.unwrap() {
            StreamEvent::Progress { data } if data.status == "scraping_posts" => break,
            _ => {}
        }
    }
    drop(session.events);

    let summary = tokio::time::timeout(Duration::from_secs(1), session.handle)
        .await
        .expect("run should stop once nobody listens")
        .unwrap();
    assert!(summary.cancelled);
    let snapshot = driver.get_status(id).await.unwrap();
    assert_eq!(snapshot.status_str(), "failed");
    assert_eq!(snapshot.error(), Some("run cancelled"));
}

// ===== Shared Breaker =====

#[tokio::test(start_paused = true)]
async fn test_breaker_is_shared_across_runs() {
    let provider = Arc::new(
        ScriptedProvider::new()
            .reply("hashtag-search", Reply::Err(server_error()))
            .reply("hashtag-search", Reply::Err(server_error()))
            .reply("hashtag-search", Reply::Err(server_error())),
    );
    let breaker = CircuitBreaker::new(
        "scripted",
        CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_secs(600),
            monitoring_period: Duration::from_secs(600),
        },
    );
    let settings = fast_settings();
    let first = RunDriver::new(provider.clone(), Arc::new(InMemoryResultSink::new()), settings.clone())
        .with_breaker(breaker.clone());
    let second = RunDriver::new(provider.clone(), Arc::new(InMemoryResultSink::new()), settings)
        .with_breaker(breaker.clone());

    let mut run = first.start(discovery("one")).await;
    drain(&mut run.events).await;
    assert_eq!(breaker.state(), CircuitState::Open);

    let mut run = second.start(discovery("two")).await;
    let events = drain(&mut run.events).await;

    assert_eq!(provider.calls_to("hashtag-search"), 3);
    let complete = complete_of(&events)[0];
    assert!(!complete.success);
    assert!(complete.error.as_deref().unwrap().contains("circuit breaker"));
}

// ===== Stream and State Agreement =====

#[tokio::test(start_paused = true)]
async fn test_replaying_stream_rebuilds_final_snapshot() {
    let provider = Arc::new(
        ScriptedProvider::new()
            .reply("hashtag-search", Reply::Err(server_error()))
            .reply(
                "hashtag-search",
                Reply::Delayed(Duration::from_millis(5), posts(&["alice"])),
            )
            .reply("profile-scraper", Reply::Err(TransportError::Decode("eof".into())))
            .reply("profile-scraper", Reply::Err(TransportError::Status {
                status: 403,
                body: "forbidden".into(),
            })),
    );
    let (driver, _sink) = driver(provider);

    let mut session = driver.start(discovery("coffee\ntea")).await;
    let events = drain(&mut session.events).await;

    for id in &session.pipeline_ids {
        let live = driver.get_status(*id).await.unwrap();
        let Pipeline::Discovery(d) = &live else {
            panic!("expected discovery");
        };
        let mut initial = DiscoveryPipeline::standard(d.keyword.clone());
        initial.id = d.id;
        initial.created_at = d.created_at;

        let rebuilt = replay(&Pipeline::Discovery(initial), &events).unwrap();
        assert_eq!(rebuilt, live);
    }
}

#[tokio::test(start_paused = true)]
async fn test_complete_events_agree_with_snapshots() {
    let provider = Arc::new(
        ScriptedProvider::new()
            .reply("hashtag-search", Reply::Ok(posts(&["a"])))
            .reply("profile-scraper", Reply::Err(TransportError::Status {
                status: 401,
                body: "token".into(),
            }))
            .reply("hashtag-search", Reply::Ok(posts(&["b"]))),
    );
    let (driver, _sink) = driver(provider);

    let mut session = driver.start(discovery("x\ny\nz")).await;
    let events = drain(&mut session.events).await;

    for data in complete_of(&events).into_iter().filter(|d| d.summary.is_none()) {
        let snapshot = driver.get_status(data.pipeline_id.unwrap()).await.unwrap();
        assert_eq!(data.success, snapshot.is_success());
        assert_eq!(data.success, snapshot.status_str() == "completed");
    }
}

// ===== Retention =====

#[tokio::test(start_paused = true)]
async fn test_eviction_drops_finished_pipeline_and_its_records() {
    let provider = Arc::new(
        ScriptedProvider::new()
            .reply("hashtag-search", Reply::Ok(posts(&["alice"])))
            .reply("profile-scraper", Reply::Ok(profiles(&["alice"]))),
    );
    let (driver, sink) = driver(provider);

    let mut session = driver.start(discovery("coffee")).await;
    drain(&mut session.events).await;
    session.handle.await.unwrap();
    let id = session.pipeline_ids[0];
    assert_eq!(sink.records(id).len(), 1);

    let cutoff = chrono::Utc::now() + chrono::Duration::seconds(1);
    assert_eq!(driver.evict_finished_before(cutoff).await, 1);

    assert!(driver.get_status(id).await.is_err());
    assert!(sink.records(id).is_empty());
    assert_eq!(driver.evict_finished_before(cutoff).await, 0);
}
