//! Retry policy for generation calls.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use contentforge_shared::{GenerationError, GenerationErrorKind, PipelineConfig};

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Backoff retries allowed per call for rate limits and timeouts.
    pub ceiling: u32,
    pub base: Duration,
    pub max: Duration,
}

impl RetryPolicy {
    /// Delay before backoff retry number `retry` (0-based): `base * 2^retry`,
    /// capped at `max`. A provider `retry_after` raises the delay to at least
    /// that value.
    pub fn backoff(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        let computed = self
            .base
            .saturating_mul(2u32.saturating_pow(retry))
            .min(self.max);
        retry_after.map_or(computed, |hint| hint.max(computed))
    }
}

impl From<&PipelineConfig> for RetryPolicy {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            ceiling: config.retry_ceiling,
            base: config.backoff_base,
            max: config.backoff_max,
        }
    }
}

/// Call `call` until it succeeds or the policy gives up.
///
/// - `RateLimited` and `Timeout`: backoff, up to `policy.ceiling` retries.
/// - `InvalidResponse`: one immediate retry.
/// - `AuthFailure`: returned at once.
///
/// `on_retry` is told about each retry before the delay starts.
pub async fn retry_generation<T, F, Fut>(
    policy: &RetryPolicy,
    mut call: F,
    mut on_retry: impl FnMut(&GenerationError, Duration),
) -> std::result::Result<T, GenerationError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, GenerationError>>,
{
    let mut backoff_retries = 0u32;
    let mut invalid_retried = false;

    loop {
        let err = match call().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let delay = match err.kind {
            GenerationErrorKind::RateLimited { retry_after }
                if backoff_retries < policy.ceiling =>
            {
                let d = policy.backoff(backoff_retries, retry_after);
                backoff_retries += 1;
                d
            }
            GenerationErrorKind::Timeout if backoff_retries < policy.ceiling => {
                let d = policy.backoff(backoff_retries, None);
                backoff_retries += 1;
                d
            }
            GenerationErrorKind::InvalidResponse if !invalid_retried => {
                invalid_retried = true;
                Duration::ZERO
            }
            _ => return Err(err),
        };

        warn!(
            kind = err.kind.as_str(),
            error = %err.message,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "retrying generation"
        );
        on_retry(&err, delay);

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}
