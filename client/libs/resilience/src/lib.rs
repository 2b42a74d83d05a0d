/// Resilience policies for calls to the community API
///
/// - **Timeout**: Every attempt gets a time limit
/// - **Retry**: Exponential backoff with jitter, gated by a retryability check
/// - **Preset Policies**: Reads retry transient failures, writes never retry
///
/// # Example: Query with retry
///
/// ```rust,no_run
/// use resilience::{presets, retry::with_retry};
///
/// #[tokio::main]
/// async fn main() {
///     let policy = presets::query_policy(std::time::Duration::from_secs(15), 2);
///     let retry = policy.retry.unwrap_or_default();
///
///     let result = with_retry(&retry, |_err: &String| true, || async {
///         // Your read request here
///         Ok::<_, String>(())
///     })
///     .await;
/// }
/// ```

pub mod presets;
pub mod retry;
pub mod timeout;

pub use presets::{mutation_policy, query_policy, RequestPolicy};
pub use retry::{with_retry, RetryConfig, RetryError};
pub use timeout::{with_timeout_result, TimeoutConfig, TimeoutError};
