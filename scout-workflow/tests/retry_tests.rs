use rstest::rstest;
use scout_workflow::resilience::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq)]
enum WorkError {
    Transient,
    Fatal,
    Timeout,
}

impl std::fmt::Display for WorkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<TimeoutError> for WorkError {
    fn from(_: TimeoutError) -> Self {
        WorkError::Timeout
    }
}

fn options(max_retries: u32) -> RetryOptions<WorkError> {
    RetryOptions::new()
        .with_max_retries(max_retries)
        .with_initial_delay(Duration::from_millis(100))
        .with_backoff_factor(2.0)
        .with_retry_condition(|e: &WorkError| *e != WorkError::Fatal)
}

// ===== Attempt Counting =====

#[rstest]
#[case(0)]
#[case(1)]
#[case(2)]
#[case(5)]
#[tokio::test(start_paused = true)]
async fn test_always_failing_work_uses_every_retry(#[case] max_retries: u32) {
    let calls = AtomicU32::new(0);
    let outcome = run_with_retry(&options(max_retries), || {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Err::<(), _>(WorkError::Transient) }
    })
    .await;

    assert!(!outcome.success());
    assert_eq!(outcome.attempts, max_retries + 1);
    assert_eq!(calls.load(Ordering::SeqCst), max_retries + 1);
    assert_eq!(outcome.error(), Some(&WorkError::Transient));
    assert!(outcome.data().is_none());
}

#[rstest]
#[case(1)]
#[case(2)]
#[case(4)]
#[tokio::test(start_paused = true)]
async fn test_succeeds_on_kth_attempt(#[case] k: u32) {
    let calls = AtomicU32::new(0);
    let outcome = run_with_retry(&options(3), || {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            if n < k {
                Err(WorkError::Transient)
            } else {
                Ok(n)
            }
        }
    })
    .await;

    assert!(outcome.success());
    assert_eq!(outcome.attempts, k);
    assert_eq!(outcome.data(), Some(&k));
}

#[tokio::test(start_paused = true)]
async fn test_non_retryable_error_stops_immediately() {
    let calls = AtomicU32::new(0);
    let outcome = run_with_retry(&options(10), || {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Err::<(), _>(WorkError::Fatal) }
    })
    .await;

    assert_eq!(outcome.attempts, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_condition_always_false_means_single_attempt() {
    let options = options(4).with_retry_condition(|_: &WorkError| false);
    let outcome = run_with_retry(&options, || async { Err::<(), _>(WorkError::Transient) }).await;
    assert_eq!(outcome.attempts, 1);
}

// ===== Backoff =====

#[tokio::test(start_paused = true)]
async fn test_two_failures_then_success_waits_100_then_200() {
    let stamps = Arc::new(Mutex::new(Vec::new()));
    let retries = Arc::new(Mutex::new(Vec::new()));
    let retries_seen = retries.clone();
    let options = RetryOptions::new()
        .with_max_retries(2)
        .with_initial_delay(Duration::from_millis(100))
        .with_backoff_factor(2.0)
        .with_on_retry(move |_: &WorkError, attempt| retries_seen.lock().unwrap().push(attempt));

    let calls = AtomicU32::new(0);
    let outcome = run_with_retry(&options, || {
        stamps.lock().unwrap().push(Instant::now());
        let n = calls.fetch_add(1, Ordering::SeqCst);
        async move {
            if n < 2 {
                Err(WorkError::Transient)
            } else {
                Ok("done")
            }
        }
    })
    .await;

    assert!(outcome.success());
    assert_eq!(outcome.attempts, 3);
    assert_eq!(*retries.lock().unwrap(), vec![1, 2]);

    let stamps = stamps.lock().unwrap();
    let delays: Vec<Duration> = stamps.windows(2).map(|w| w[1] - w[0]).collect();
    assert_eq!(
        delays,
        vec![Duration::from_millis(100), Duration::from_millis(200)]
    );
}

#[test]
fn test_delays_form_geometric_sequence() {
    let options = RetryOptions::<WorkError>::new()
        .with_initial_delay(Duration::from_millis(250))
        .with_backoff_factor(3.0);
    let delays: Vec<u128> = (1..=4).map(|i| options.delay_for(i).as_millis()).collect();
    assert_eq!(delays, vec![250, 750, 2250, 6750]);
}

// ===== Per-attempt Timeout =====

#[tokio::test(start_paused = true)]
async fn test_slow_attempt_is_abandoned_and_retried() {
    let calls = AtomicU32::new(0);
    let outcome = run_with_retry_timeout(&options(2), Duration::from_secs(1), || {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        async move {
            if n == 0 {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            Ok::<_, WorkError>(n)
        }
    })
    .await;

    assert!(outcome.success());
    assert_eq!(outcome.attempts, 2);
    assert_eq!(outcome.into_result(), Ok(1));
}

#[tokio::test(start_paused = true)]
async fn test_every_attempt_timing_out_reports_timeout() {
    let start = Instant::now();
    let outcome = run_with_retry_timeout(&options(1), Duration::from_millis(500), || {
        std::future::pending::<Result<(), WorkError>>()
    })
    .await;

    assert_eq!(outcome.attempts, 2);
    assert_eq!(outcome.error(), Some(&WorkError::Timeout));
    // two deadlines plus one 100ms backoff
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(1100));
    assert!(elapsed < Duration::from_millis(1200));
}
