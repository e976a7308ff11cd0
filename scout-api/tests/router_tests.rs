use axum::{
    body::Body,
    http::{header, Request, Response, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use pretty_assertions::assert_eq;
use rstest::rstest;
use scout_api::*;
use scout_core::{Pipeline, StreamEvent};
use scout_workflow::{
    DriverSettings, HttpScrapeProvider, InMemoryResultSink, ProviderSettings, RetrySettings,
    RunDriver,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ===== Test Helper Functions =====

fn create_test_app_state(base_url: &str, limits: RunLimits) -> AppState {
    let provider = HttpScrapeProvider::new(ProviderSettings {
        base_url: base_url.to_string(),
        ..Default::default()
    })
    .unwrap();
    let settings = DriverSettings {
        retry: RetrySettings {
            max_retries: 1,
            initial_delay_ms: 10,
            ..Default::default()
        },
        step_timeout_secs: 5,
        ..Default::default()
    };
    let driver = RunDriver::new(
        Arc::new(provider),
        Arc::new(InMemoryResultSink::new()),
        settings,
    );
    AppState::new(driver, limits)
}

fn app(state: AppState) -> Router {
    scout_api::routes(state)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method("POST")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method("GET")
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Decodes every `data:` frame of a finished SSE body.
async fn sse_events(response: Response<Body>) -> Vec<StreamEvent> {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    text.split("\n\n")
        .filter_map(|frame| frame.strip_prefix("data: "))
        .map(|json| StreamEvent::from_json(json).unwrap())
        .collect()
}

async fn mount_job(server: &MockServer, actor: &str, items: Value) {
    Mock::given(method("POST"))
        .and(path(format!("/actors/{}/runs", actor)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "log": [format!("{} done", actor)],
            "items": items,
        })))
        .mount(server)
        .await;
}

// ===== Run Submission Tests =====

#[tokio::test]
async fn test_discovery_streams_events_until_run_complete() {
    let server = MockServer::start().await;
    mount_job(&server, "hashtag-search", json!([{"ownerUsername": "alice"}])).await;
    mount_job(&server, "profile-scraper", json!([{"username": "alice", "followersCount": 10}])).await;
    let app = app(create_test_app_state(&server.uri(), RunLimits::default()));

    let response = app
        .oneshot(post_json("/pipeline/discovery", json!({"keywords": "#coffee\n\n"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert!(headers[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));
    assert_eq!(headers[header::CACHE_CONTROL], "no-cache");
    assert_eq!(headers["x-accel-buffering"], "no");

    let events = sse_events(response).await;
    assert_eq!(events.first().map(StreamEvent::event_type), Some("progress"));
    assert!(events.iter().any(|e| matches!(
        e,
        StreamEvent::Output { data, keyword: Some(k) } if data == "Saved 1 profile(s)" && k == "coffee"
    )));

    let last = events.last().unwrap();
    assert!(last.is_run_complete());
    match last {
        StreamEvent::Complete { data } => {
            assert!(data.success);
            let summary = data.summary.as_ref().unwrap();
            assert_eq!(summary.total, 1);
            assert_eq!(summary.succeeded, 1);
        }
        other => panic!("unexpected final event {:?}", other),
    }
    assert_eq!(events.iter().filter(|e| e.is_run_complete()).count(), 1);
}

#[tokio::test]
async fn test_metrics_stream_reports_fixed_percentages() {
    let server = MockServer::start().await;
    mount_job(
        &server,
        "post-scraper",
        json!([{"ownerUsername": "alice", "likesCount": 4}]),
    )
    .await;
    let app = app(create_test_app_state(&server.uri(), RunLimits::default()));

    let response = app
        .oneshot(post_json("/pipeline/metrics", json!({"handles": ["@Alice", "alice"]})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let percentages: Vec<u8> = sse_events(response)
        .await
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Progress { data } => data.progress,
            _ => None,
        })
        .collect();
    assert_eq!(percentages, vec![0, 25, 50, 75, 100]);
}

#[tokio::test]
async fn test_provider_outage_fails_pipeline_not_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    let app = app(create_test_app_state(&server.uri(), RunLimits::default()));

    let response = app
        .oneshot(post_json("/pipeline/discovery", json!({"keywords": "coffee"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let events = sse_events(response).await;
    // one retry notice plus the step failure
    assert_eq!(events.iter().filter(|e| e.event_type() == "error").count(), 2);
    match events.last().unwrap() {
        StreamEvent::Complete { data } => {
            assert!(!data.success);
            assert_eq!(data.summary.as_ref().unwrap().failed, 1);
        }
        other => panic!("unexpected final event {:?}", other),
    }
}

#[rstest]
#[case::empty_keywords("/pipeline/discovery", json!({"keywords": ""}))]
#[case::only_blank_keywords("/pipeline/discovery", json!({"keywords": "\n  \n#\n"}))]
#[case::too_many_keywords("/pipeline/discovery", json!({"keywords": "a\nb\nc"}))]
#[case::empty_handles("/pipeline/metrics", json!({"handles": []}))]
#[case::blank_handles("/pipeline/metrics", json!({"handles": ["@", " "]}))]
#[case::too_many_handles("/pipeline/metrics", json!({"handles": ["a", "b", "c", "d"]}))]
#[tokio::test]
async fn test_invalid_run_request_is_rejected(#[case] uri: &str, #[case] body: Value) {
    let limits = RunLimits {
        max_keywords: 2,
        max_handles: 3,
    };
    let app = app(create_test_app_state("http://127.0.0.1:9", limits));

    let response = app.oneshot(post_json(uri, body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Validation error");
    assert!(body["details"].is_string());
}

fn post_raw(uri: &str, body: &'static str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method("POST")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap()
}

#[rstest]
#[case::missing_keywords("/pipeline/discovery", "{}", "Validation error")]
#[case::keywords_wrong_type("/pipeline/discovery", r#"{"keywords": 7}"#, "Validation error")]
#[case::missing_handles("/pipeline/metrics", "{}", "Validation error")]
#[case::not_json("/pipeline/discovery", "not json", "Bad request")]
#[tokio::test]
async fn test_malformed_run_body_gets_json_error(
    #[case] uri: &str,
    #[case] body: &'static str,
    #[case] error: &str,
) {
    let app = app(create_test_app_state("http://127.0.0.1:9", RunLimits::default()));

    let response = app.oneshot(post_raw(uri, body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE].to_str().unwrap(),
        "application/json"
    );
    let body = body_json(response).await;
    assert_eq!(body["error"], error);
    assert!(body["details"].is_string());
}

#[tokio::test]
async fn test_configured_handle_limit_above_default_is_honoured() {
    let limits = RunLimits {
        max_keywords: 50,
        max_handles: MAX_HANDLES + 50,
    };
    let app = app(create_test_app_state("http://127.0.0.1:9", limits));
    let handles: Vec<String> = (0..MAX_HANDLES + 20).map(|i| format!("user{}", i)).collect();

    let response = app
        .oneshot(post_json("/pipeline/metrics", json!({ "handles": handles })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));
}

#[tokio::test]
async fn test_dropping_stream_cancels_run() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
        .mount(&server)
        .await;
    let state = create_test_app_state(&server.uri(), RunLimits::default());
    let app = app(state.clone());

    let response = app
        .oneshot(post_json("/pipeline/discovery", json!({"keywords": "coffee"})))
        .await
        .unwrap();

    let mut body = response.into_body();
    let mut pipeline_id = None;
    let mut buffer = String::new();
    while !buffer.contains("\"step\":\"search_posts\"") {
        let frame = body.frame().await.unwrap().unwrap();
        if let Ok(data) = frame.into_data() {
            buffer.push_str(std::str::from_utf8(&data).unwrap());
        }
    }
    for chunk in buffer.split("\n\n") {
        if let Some(Ok(StreamEvent::Progress { data })) =
            chunk.strip_prefix("data: ").map(StreamEvent::from_json)
        {
            pipeline_id = data.pipeline_id;
        }
    }
    drop(body);

    let id = pipeline_id.unwrap();
    let mut pipeline = state.driver.get_status(id).await.unwrap();
    for _ in 0..200 {
        if pipeline.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        pipeline = state.driver.get_status(id).await.unwrap();
    }
    assert_eq!(pipeline.status_str(), "failed");
    assert_eq!(pipeline.error(), Some("run cancelled"));
}

// ===== Status Polling Tests =====

#[tokio::test]
async fn test_polling_returns_snapshot_after_run() {
    let server = MockServer::start().await;
    mount_job(&server, "hashtag-search", json!([])).await;
    let state = create_test_app_state(&server.uri(), RunLimits::default());

    let response = app(state.clone())
        .oneshot(post_json("/pipeline/discovery", json!({"keywords": "tea"})))
        .await
        .unwrap();
    let events = sse_events(response).await;
    let id = events
        .iter()
        .find_map(|e| match e {
            StreamEvent::Progress { data } => data.pipeline_id,
            _ => None,
        })
        .unwrap();

    let first = app(state.clone())
        .oneshot(get(&format!("/pipeline?pipelineId={}", id)))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let first = body_json(first).await;
    assert_eq!(first["kind"], "discovery");
    assert_eq!(first["keyword"], "tea");
    assert_eq!(first["status"], "completed");
    assert!(first["createdAt"].is_string());

    let second = app(state)
        .oneshot(get(&format!("/pipeline?pipelineId={}", id)))
        .await
        .unwrap();
    assert_eq!(body_json(second).await, first);

    let typed: Pipeline = serde_json::from_value(first).unwrap();
    assert_eq!(typed.id(), id);
}

#[rstest]
#[case::missing("/pipeline", StatusCode::BAD_REQUEST)]
#[case::blank("/pipeline?pipelineId=", StatusCode::BAD_REQUEST)]
#[case::malformed("/pipeline?pipelineId=not-a-uuid", StatusCode::BAD_REQUEST)]
#[case::unknown(
    "/pipeline?pipelineId=6a2f41a3-c54c-4ac1-a1b4-d2b6b4f0a1a7",
    StatusCode::NOT_FOUND
)]
#[tokio::test]
async fn test_polling_errors(#[case] uri: &str, #[case] status: StatusCode) {
    let app = app(create_test_app_state("http://127.0.0.1:9", RunLimits::default()));

    let response = app.oneshot(get(uri)).await.unwrap();

    assert_eq!(response.status(), status);
    assert!(body_json(response).await["error"].is_string());
}

// ===== Health Tests =====

#[tokio::test]
async fn test_health_reports_breaker_state() {
    let app = app(create_test_app_state("http://127.0.0.1:9", RunLimits::default()));

    let response = app.oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["breaker"], "CLOSED");
    assert_eq!(body["trackedPipelines"], 0);
}
