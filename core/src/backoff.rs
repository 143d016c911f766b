use crate::config::ApiConfig;
use crate::{Error, Result};
use backoff::backoff::Backoff;
use metrics::counter;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Attempt budget and delay shape for transient HTTP failures.
///
/// The delay before retry `a` (0-indexed) is `base * 2^a`, optionally capped,
/// plus a uniform jitter in `[0, jitter)`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub jitter: Duration,
    pub max_delay: Option<Duration>,
}

impl RetryPolicy {
    pub fn from_config(config: &ApiConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            jitter: Duration::from_millis(config.retry_jitter_ms),
            max_delay: config.retry_max_delay_ms.map(Duration::from_millis),
        }
    }

    /// `jitter_unit` is expected in `[0, 1)`.
    pub fn delay_for(&self, attempt: u32, jitter_unit: f64) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let mut delay = self.base_delay.saturating_mul(factor);
        if let Some(cap) = self.max_delay {
            delay = delay.min(cap);
        }
        delay + self.jitter.mul_f64(jitter_unit.clamp(0.0, 1.0))
    }

    pub fn backoff(&self) -> JitteredExponential {
        JitteredExponential {
            policy: self.clone(),
            attempt: 0,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            base_delay: Duration::from_secs(1),
            jitter: Duration::from_secs(1),
            max_delay: None,
        }
    }
}

/// Exponential backoff with additive jitter. The attempt budget lives in
/// [`RetryPolicy`], so this never reports exhaustion on its own.
#[derive(Debug, Clone)]
pub struct JitteredExponential {
    policy: RetryPolicy,
    attempt: u32,
}

impl Backoff for JitteredExponential {
    fn reset(&mut self) {
        self.attempt = 0;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        let jitter_unit = rand::thread_rng().gen::<f64>();
        let delay = self.policy.delay_for(self.attempt, jitter_unit);
        self.attempt = self.attempt.saturating_add(1);
        Some(delay)
    }
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or
/// the policy's attempt budget is spent. The last retryable error is returned
/// on exhaustion.
pub async fn retry_with_backoff<F, Fut, T>(
    mut operation: F,
    policy: &RetryPolicy,
    operation_name: &str,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = policy.backoff();
    let mut attempts = 0;

    while attempts < policy.max_attempts {
        attempts += 1;

        match operation().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!(
                        operation = operation_name,
                        attempts,
                        "Operation succeeded after retries"
                    );
                }
                return Ok(result);
            }
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => {
                if attempts >= policy.max_attempts {
                    warn!(
                        operation = operation_name,
                        attempts,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                if let Some(duration) = backoff.next_backoff() {
                    warn!(
                        operation = operation_name,
                        attempt = attempts,
                        retry_after_ms = duration.as_millis(),
                        error = %e,
                        "Operation failed, retrying"
                    );
                    counter!("extractor_http_retries", "operation" => operation_name.to_string())
                        .increment(1);
                    tokio::time::sleep(duration).await;
                } else {
                    return Err(e);
                }
            }
        }
    }

    Err(Error::Transport(format!(
        "{}: no response obtained within {} attempts",
        operation_name, policy.max_attempts
    )))
}
