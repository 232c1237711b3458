//! Retry-with-backoff policy shared by every generation call site.

use std::future::Future;
use std::time::Duration;

/// Linear backoff: the delay before attempt `n + 1` is `base_delay * n`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(1000))
    }
}

/// Run `op` until it succeeds or `policy.max_attempts` is reached.
///
/// Returns the last error when every attempt failed. No delay follows the
/// final attempt.
pub async fn retry_with_backoff<T, E, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= policy.max_attempts => return Err(e),
            Err(e) => {
                let delay = policy.delay_after(attempt);
                tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "Attempt failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
