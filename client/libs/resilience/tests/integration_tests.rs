/// Integration tests for resilience library
use resilience::{
    presets,
    retry::{with_retry, RetryError},
    timeout::{with_timeout_result, TimeoutError},
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
enum CallError {
    Transient,
    Rejected(u16),
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallError::Transient => write!(f, "transient"),
            CallError::Rejected(status) => write!(f, "rejected with {}", status),
        }
    }
}

fn is_transient(err: &TimeoutError<CallError>) -> bool {
    matches!(
        err,
        TimeoutError::Elapsed(_) | TimeoutError::Failed(CallError::Transient)
    )
}

// ==================== Timeout + Retry ====================

#[tokio::test]
async fn test_timed_out_attempt_is_retried() {
    let policy = presets::query_policy_with_backoff(
        Duration::from_millis(20),
        2,
        Duration::from_millis(5),
    );
    let retry = policy.retry_or_single();
    let attempts = Arc::new(AtomicU32::new(0));

    let result = with_retry(&retry, is_transient, || {
        let attempt = attempts.fetch_add(1, Ordering::SeqCst);
        with_timeout_result(policy.timeout.duration, async move {
            if attempt == 0 {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            Ok::<_, CallError>("feed")
        })
    })
    .await;

    assert_eq!(result.unwrap(), "feed");
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_client_error_stops_retry_loop() {
    let policy = presets::query_policy_with_backoff(
        Duration::from_secs(1),
        3,
        Duration::from_millis(5),
    );
    let retry = policy.retry_or_single();
    let attempts = Arc::new(AtomicU32::new(0));

    let result = with_retry(&retry, is_transient, || {
        attempts.fetch_add(1, Ordering::SeqCst);
        with_timeout_result(policy.timeout.duration, async {
            Err::<(), _>(CallError::Rejected(404))
        })
    })
    .await;

    match result {
        Err(RetryError::Permanent(TimeoutError::Failed(CallError::Rejected(404)))) => {}
        other => panic!("unexpected result: {:?}", other.map_err(|e| e.to_string())),
    }
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_mutation_policy_single_attempt() {
    let policy = presets::mutation_policy(Duration::from_secs(1));
    let retry = policy.retry_or_single();
    let attempts = Arc::new(AtomicU32::new(0));

    let result = with_retry(&retry, is_transient, || {
        attempts.fetch_add(1, Ordering::SeqCst);
        with_timeout_result(policy.timeout.duration, async {
            Err::<(), _>(CallError::Transient)
        })
    })
    .await;

    assert!(matches!(result, Err(RetryError::Exhausted { attempts: 1, .. })));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}
