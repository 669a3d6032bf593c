use std::{fmt::Display, future::Future, time::Duration};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Hard ceiling on any single backoff sleep.
pub const BACKOFF_CAP: Duration = Duration::from_secs(120);

/// Error returned by [`RetryExecutor::execute`].
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The run context was cancelled while waiting to retry.
    #[error("operation '{operation}' cancelled while backing off")]
    Cancelled { operation: String },
    /// Every attempt failed; carries the last failure.
    #[error("operation '{operation}' failed after {attempts} attempt(s): {source}")]
    Exhausted {
        operation: String,
        attempts: u32,
        source: E,
    },
}

impl<E> RetryError<E> {
    /// The terminal error of the last attempt, if any.
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Cancelled { .. } => None,
            RetryError::Exhausted { source, .. } => Some(source),
        }
    }
}

/// Exponential-backoff executor over a retryable async operation.
///
/// With `attempts` retries configured the operation runs at most
/// `attempts + 1` times, sleeping `base_delay * 2^(n-1)` between runs,
/// capped by `max_delay` and [`BACKOFF_CAP`]. The sleep races the run's
/// cancellation token and yields immediately when it fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryExecutor {
    attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryExecutor {
    pub fn new(attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            attempts,
            base_delay,
            max_delay,
        }
    }

    /// Retries configured on top of the initial attempt.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Backoff before retry `attempt` (1-based).
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        exp.min(self.max_delay).min(BACKOFF_CAP)
    }

    /// Run `op` until it succeeds or the attempt budget is spent.
    pub async fn execute<T, E, F, Fut>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let runs = self.attempts + 1;
        for attempt in 1 ..= runs {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(operation, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(source) if attempt < runs => {
                    let backoff = self.backoff(attempt);
                    warn!(
                        operation,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        %source,
                        "attempt failed, backing off"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            return Err(RetryError::Cancelled {
                                operation: operation.to_string(),
                            });
                        }
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                Err(source) => {
                    error!(operation, attempts = runs, %source, "attempts exhausted");
                    return Err(RetryError::Exhausted {
                        operation: operation.to_string(),
                        attempts: runs,
                        source,
                    });
                }
            }
        }
        unreachable!("the final attempt either returns or errors")
    }
}
