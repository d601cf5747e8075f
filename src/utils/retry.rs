use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::Retry;

pub const MAX_RETRIES: usize = 3;
pub const INITIAL_DELAY: Duration = Duration::from_secs(5);

/// Bounded exponential backoff: `initial_delay`, then twice that, and so on,
/// for at most `max_attempts` calls of `operation`.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_attempts: usize,
    pub initial_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_RETRIES,
            initial_delay: INITIAL_DELAY,
        }
    }
}

impl BackoffPolicy {
    pub fn new(max_attempts: usize, initial_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
        }
    }

    /// Delays slept between attempts.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        // base 2 with factor initial/2 yields initial, 2*initial, 4*initial...
        let half = (self.initial_delay.as_millis() as u64 / 2).max(1);
        ExponentialBackoff::from_millis(2)
            .factor(half)
            .take(self.max_attempts.saturating_sub(1))
    }
}

/// Run `operation` until it succeeds or the policy is exhausted, returning the
/// last error in the latter case.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: BackoffPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = policy.max_attempts;
    let mut attempt = 0usize;

    Retry::start(policy.delays(), || {
        attempt += 1;
        let current = attempt;
        let fut = operation();
        async move {
            match fut.await {
                Ok(value) => Ok(value),
                Err(e) => {
                    if current >= max_attempts {
                        tracing::error!(
                            "{} failed after {} attempts: {}",
                            operation_name,
                            max_attempts,
                            e
                        );
                    } else {
                        tracing::warn!(
                            "{} failed (attempt {}/{}): {}. Retrying...",
                            operation_name,
                            current,
                            max_attempts,
                            e
                        );
                    }
                    Err(e)
                }
            }
        }
    })
    .await
}
