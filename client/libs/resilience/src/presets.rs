/// Preset policies for community API requests
use crate::retry::RetryConfig;
use crate::timeout::TimeoutConfig;
use std::time::Duration;

/// Timeout plus optional retry for one class of request
#[derive(Debug, Clone)]
pub struct RequestPolicy {
    pub timeout: TimeoutConfig,
    pub retry: Option<RetryConfig>,
}

impl RequestPolicy {
    /// Retry settings, or a single-attempt policy when retry is off
    pub fn retry_or_single(&self) -> RetryConfig {
        self.retry.clone().unwrap_or_else(RetryConfig::disabled)
    }
}

/// Reads (feed, post, profile, search)
///
/// - Retry: transient failures only, exponential backoff from `initial_backoff`
pub fn query_policy(request_timeout: Duration, max_retries: u32) -> RequestPolicy {
    query_policy_with_backoff(request_timeout, max_retries, Duration::from_millis(200))
}

pub fn query_policy_with_backoff(
    request_timeout: Duration,
    max_retries: u32,
    initial_backoff: Duration,
) -> RequestPolicy {
    RequestPolicy {
        timeout: TimeoutConfig {
            duration: request_timeout,
        },
        retry: Some(RetryConfig {
            max_retries,
            initial_backoff,
            max_backoff: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter: true,
        }),
    }
}

/// Writes (likes, comments, friendship changes)
///
/// - No retry: the optimistic cycle rolls back instead, and toggles are not idempotent
pub fn mutation_policy(request_timeout: Duration) -> RequestPolicy {
    RequestPolicy {
        timeout: TimeoutConfig {
            duration: request_timeout,
        },
        retry: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutation_policy_never_retries() {
        let policy = mutation_policy(Duration::from_secs(15));
        assert!(policy.retry.is_none());
        assert_eq!(policy.retry_or_single().max_retries, 0);
    }

    #[test]
    fn test_query_policy_uses_budget() {
        let policy = query_policy_with_backoff(Duration::from_secs(5), 4, Duration::from_millis(50));
        let retry = policy.retry_or_single();
        assert_eq!(retry.max_retries, 4);
        assert_eq!(retry.initial_backoff, Duration::from_millis(50));
        assert_eq!(policy.timeout.duration, Duration::from_secs(5));
    }
}
