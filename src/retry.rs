//! Submission backoff with exponential delay and jitter.
//!
//! All retry decisions in the crate go through [`backoff_delay`] so the
//! cap and jitter behavior stays uniform: nominal delay is
//! `base * 2^retry_count` clamped to the configured cap, with ±25% jitter
//! to avoid thundering-herd resubmission after a throttling window.

use crate::config::QueueConfig;
use crate::error::EngineError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Jitter fraction applied around the nominal backoff delay
const JITTER_FRACTION: f64 = 0.25;

/// Compute the backoff delay for the given retry count.
///
/// The returned delay is within ±25% of `min(base * 2^retry_count, max)`.
pub fn backoff_delay(config: &QueueConfig, retry_count: u32) -> Duration {
    let nominal = nominal_delay(config, retry_count);
    let jitter = nominal.as_secs_f64() * JITTER_FRACTION * rand::thread_rng().gen_range(-1.0..=1.0);
    Duration::from_secs_f64((nominal.as_secs_f64() + jitter).max(0.0))
}

/// Nominal (un-jittered) backoff delay, exposed for tests and logging
pub fn nominal_delay(config: &QueueConfig, retry_count: u32) -> Duration {
    let factor = 2u64.checked_pow(retry_count).unwrap_or(u64::MAX);
    config
        .backoff_base
        .checked_mul(factor.min(u32::MAX as u64) as u32)
        .unwrap_or(config.backoff_max)
        .min(config.backoff_max)
}

/// Run an engine call, retrying rate-limited failures with backoff.
///
/// Only [`EngineErrorKind::RateLimited`](crate::error::EngineErrorKind)
/// failures are retried; anything else is returned to the caller on first
/// occurrence. Used for calls that must succeed before a larger operation
/// can proceed (e.g., remote directory creation during folder upload).
pub async fn with_rate_limit_retry<F, Fut, T>(
    config: &QueueConfig,
    mut operation: F,
) -> Result<T, EngineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "operation succeeded after backoff");
                }
                return Ok(value);
            }
            Err(e) if e.is_rate_limited() && attempt < config.max_retries => {
                let delay = backoff_delay(config, attempt);
                attempt += 1;
                tracing::warn!(
                    error = %e,
                    attempt,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis(),
                    "rate limited, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
