use crate::config::MarketDataConfig;
use crate::domain::errors::MarketDataError;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Attempt budget and delay schedule for a single upstream call
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: usize,
    delays: Vec<Duration>,
}

impl RetryPolicy {
    /// # Arguments
    /// * `max_attempts` - Total attempts including the first; clamped to at least 1
    /// * `delays` - Sleep before retry N. Sorted so the schedule never shrinks;
    ///   the last value repeats once the schedule runs out
    pub fn new(max_attempts: usize, mut delays: Vec<Duration>) -> Self {
        delays.sort();
        Self {
            max_attempts: max_attempts.max(1),
            delays,
        }
    }

    pub fn from_config(config: &MarketDataConfig) -> Self {
        Self::new(config.max_retries, config.retry_delays.clone())
    }

    /// Single attempt, no sleeping
    pub fn no_retry() -> Self {
        Self::new(1, Vec::new())
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Delay to wait after failed attempt number `failed_attempt` (1-based)
    pub fn delay_after(&self, failed_attempt: usize) -> Duration {
        let idx = failed_attempt.saturating_sub(1);
        self.delays
            .get(idx)
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&MarketDataConfig::default())
    }
}

/// Runs an upstream call under a [`RetryPolicy`].
///
/// Retryable failures (429, other non-2xx, network) are retried until the
/// budget runs out; anything else is returned immediately. The backoff sleep
/// only parks the calling task.
#[derive(Debug, Clone)]
pub struct BackoffExecutor {
    policy: RetryPolicy,
    name: String,
}

impl BackoffExecutor {
    pub fn new(name: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            policy,
            name: name.into(),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute `op` until it succeeds, fails fatally, exhausts the attempt
    /// budget, or `cancel` fires. Cancellation interrupts both an in-flight
    /// attempt and a pending backoff sleep and yields
    /// [`MarketDataError::Cancelled`].
    pub async fn execute<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, MarketDataError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, MarketDataError>>,
    {
        let max_attempts = self.policy.max_attempts();

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return Err(MarketDataError::Cancelled);
            }

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(MarketDataError::Cancelled),
                result = op() => result,
            };

            let err = match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(
                            "BackoffExecutor [{}]: Succeeded on attempt {}/{}",
                            self.name, attempt, max_attempts
                        );
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => e,
            };

            if attempt == max_attempts {
                warn!(
                    "BackoffExecutor [{}]: Giving up after {} attempts: {}",
                    self.name, attempt, err
                );
                return Err(MarketDataError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            let delay = self.policy.delay_after(attempt);
            warn!(
                "BackoffExecutor [{}]: Attempt {}/{} failed ({}). Retrying in {:?}",
                self.name, attempt, max_attempts, err, delay
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(MarketDataError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        // max_attempts >= 1, the loop always returns
        Err(MarketDataError::Cancelled)
    }
}
