use crate::error::{PaymentError, Result};
use std::future::Future;
use std::time::Duration;

/// Bounded retry with doubling backoff for transient failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay,
        }
    }

    /// Delay before attempt `attempt + 1`, where `attempt` starts at 1.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }

    /// Runs `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Transient errors that survive every attempt surface as
    /// `ServiceUnavailable`; other errors are returned untouched.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.attempts => {
                    let delay = self.delay_after(attempt);
                    tracing::warn!(
                        operation = what,
                        attempt,
                        error = %err,
                        "transient repository error, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) if err.is_transient() => {
                    tracing::error!(operation = what, attempt, error = %err, "giving up");
                    return Err(PaymentError::ServiceUnavailable(what.to_string()));
                }
                Err(err) => return Err(err),
            }
        }
    }
}
