//! Bounded exponential-backoff retry.

use super::DispatchError;

use std::future::Future;
use std::time::Duration;

/// Retry schedule for one endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Bound on each individual attempt.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryDecision {
    Retry(Duration),
    GiveUp,
}

impl RetryPolicy {
    /// Delay to wait after failed attempt `attempt` (1-based):
    /// `base * 2^(attempt-1)`, capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub fn decide(&self, attempt: u32, error: &DispatchError) -> RetryDecision {
        if !error.is_retryable() || attempt >= self.max_attempts.max(1) {
            RetryDecision::GiveUp
        } else {
            RetryDecision::Retry(self.backoff(attempt))
        }
    }

    /// Run `op` until it succeeds, fails permanently, or the attempt budget is
    /// spent. Each attempt is bounded by `attempt_timeout`.
    ///
    /// Returns the number of attempts made along with the final result.
    pub async fn run<F, Fut>(&self, label: &str, mut op: F) -> (u32, Result<(), DispatchError>)
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<(), DispatchError>>,
    {
        let mut attempt = 1;
        loop {
            let result = match tokio::time::timeout(self.attempt_timeout, op(attempt)).await {
                Ok(result) => result,
                Err(_) => Err(DispatchError::Timeout(self.attempt_timeout)),
            };

            let err = match result {
                Ok(()) => return (attempt, Ok(())),
                Err(e) => e,
            };

            match self.decide(attempt, &err) {
                RetryDecision::Retry(delay) => {
                    tracing::warn!(
                        endpoint = label,
                        attempt,
                        max_attempts = self.max_attempts,
                        sleep_seconds = delay.as_secs_f64(),
                        error = %err,
                        "Dispatch attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                RetryDecision::GiveUp => return (attempt, Err(err)),
            }
        }
    }
}
