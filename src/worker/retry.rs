use crate::config::RetryConfig;
use crate::error::PipelineError;
use std::future::Future;
use std::time::Duration;

/// Backoff policy for calls to external services.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl From<RetryConfig> for RetryPolicy {
    fn from(config: RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.base_delay(),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt + 1`: `base * 2^attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Whether a failure is worth another attempt.
///
/// Rate limits, server errors and failures with no status at all are
/// retried. Any other status fails fast, and so does missing configuration.
pub fn is_retryable(err: &PipelineError) -> bool {
    if matches!(err, PipelineError::Config(_)) {
        return false;
    }
    match err.status_code() {
        None => true,
        Some(status) => status == 429 || status >= 500,
    }
}

/// Run `op`, retrying transient failures with exponential backoff.
///
/// Makes at most `max_retries + 1` attempts. The final failure is returned
/// unchanged.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T, PipelineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PipelineError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= policy.max_retries || !is_retryable(&err) {
                    return Err(err);
                }
                let delay = policy.delay_for(attempt);
                log::warn!(
                    "Attempt {} failed, retrying in {}ms: {}",
                    attempt + 1,
                    delay.as_millis(),
                    err
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
