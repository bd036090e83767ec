use crate::config::RetryConfig;
use crate::error::CollaboratorError;
use std::future::Future;
use std::time::Duration;

/// Delay before retry number `attempt` (1-based): base doubled per attempt,
/// capped at `backoff_max_ms`.
pub fn backoff_delay(policy: &RetryConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let millis = policy
        .backoff_base_ms
        .saturating_mul(1u64 << exponent)
        .min(policy.backoff_max_ms);
    Duration::from_millis(millis)
}

/// Runs `op` up to `max_attempts` times, bounding each attempt by the policy
/// timeout. Only timeouts and transient failures are retried.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryConfig,
    service: &'static str,
    mut op: F,
) -> Result<T, CollaboratorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CollaboratorError>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let outcome = match tokio::time::timeout(policy.timeout(), op()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(CollaboratorError::Timeout { service }),
        };
        match outcome {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < attempts => {
                let delay = backoff_delay(policy, attempt);
                tracing::warn!(service, attempt, ?delay, error = %err, "retrying collaborator call");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
