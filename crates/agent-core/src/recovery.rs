//! Retry, polling and timeout helpers
//!
//! Every place in the coordinator that waits on a flaky external system goes
//! through this module so the backoff and timeout constants live in
//! configuration rather than at call sites.
//!
//! - [`retry_with_backoff`] / [`retry_with_backoff_notify`]: bounded retry
//!   ladder with linear or exponential spacing
//! - [`poll_until`]: re-check a synchronous condition on a fixed interval until
//!   it holds or a deadline passes
//! - [`with_timeout`]: attach a hard deadline to any future

use crate::error::{CoordinatorError, CoordinatorResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, warn};

/// How the delay grows between attempts
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackoffStrategy {
    /// Delay before attempt `n` is `n * initial_delay`
    Linear,
    /// Delay grows by `multiplier` after every failure
    Exponential { multiplier: f64 },
}

/// Configuration for retry behavior
///
/// The join ladder used when an agent goes available is
/// [`RetryConfig::conference_join`]: five attempts, each preceded by a
/// linearly growing delay of 2s, 4s, 6s, 8s and 10s.
///
/// ```rust
/// # use agentdesk_agent_core::recovery::RetryConfig;
/// # use std::time::Duration;
/// let ladder = RetryConfig::conference_join(5, Duration::from_secs(2));
/// let delays: Vec<_> = (1..=5).map(|n| ladder.delay_before(n)).collect();
/// assert_eq!(delays.iter().map(|d| d.as_secs()).collect::<Vec<_>>(), vec![2, 4, 6, 8, 10]);
/// ```
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Base delay
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Delay growth
    pub strategy: BackoffStrategy,
    /// Sleep before the very first attempt as well
    pub delay_first_attempt: bool,
    /// Randomize each delay by +/-10%
    pub use_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            strategy: BackoffStrategy::Exponential { multiplier: 2.0 },
            delay_first_attempt: false,
            use_jitter: true,
        }
    }
}

impl RetryConfig {
    /// Short exponential ladder for quick network operations
    pub fn quick() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(5),
            strategy: BackoffStrategy::Exponential { multiplier: 1.5 },
            delay_first_attempt: false,
            use_jitter: true,
        }
    }

    /// Linear ladder used for joining the agent conference
    pub fn conference_join(max_attempts: u32, step: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay: step,
            max_delay: step * max_attempts.max(1),
            strategy: BackoffStrategy::Linear,
            delay_first_attempt: true,
            use_jitter: false,
        }
    }

    /// Delay to wait before attempt number `attempt` (1-based)
    pub fn delay_before(&self, attempt: u32) -> Duration {
        let index = if self.delay_first_attempt { attempt } else { attempt.saturating_sub(1) };
        if index == 0 {
            return Duration::ZERO;
        }
        let delay = match self.strategy {
            BackoffStrategy::Linear => self.initial_delay * index,
            BackoffStrategy::Exponential { multiplier } => {
                let millis = self.initial_delay.as_millis() as f64 * multiplier.powi(index as i32 - 1);
                Duration::from_millis(millis as u64)
            }
        };
        delay.min(self.max_delay)
    }
}

/// Retry an async operation with backoff
///
/// Only errors for which [`CoordinatorError::is_recoverable`] is true are
/// retried. The last error is returned once `max_attempts` is reached.
pub async fn retry_with_backoff<T, F, Fut>(
    operation_name: &str,
    config: RetryConfig,
    operation: F,
) -> CoordinatorResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CoordinatorResult<T>>,
{
    retry_with_backoff_notify(operation_name, config, operation, |_, _| {}).await
}

/// Like [`retry_with_backoff`], calling `on_retry(next_attempt, &error)` after
/// every failure that will be retried.
pub async fn retry_with_backoff_notify<T, F, Fut, N>(
    operation_name: &str,
    config: RetryConfig,
    mut operation: F,
    mut on_retry: N,
) -> CoordinatorResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CoordinatorResult<T>>,
    N: FnMut(u32, &CoordinatorError),
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let delay = jittered(config.delay_before(attempt), config.use_jitter);
        if !delay.is_zero() {
            sleep(delay).await;
        }

        debug!(
            operation = operation_name,
            attempt = attempt,
            max_attempts = max_attempts,
            "Attempting operation"
        );

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(
                        operation = operation_name,
                        attempt = attempt,
                        "Operation succeeded after retries"
                    );
                }
                return Ok(result);
            }
            Err(e) if e.is_recoverable() && attempt < max_attempts => {
                warn!(
                    operation = operation_name,
                    attempt = attempt,
                    error = %e,
                    category = e.category(),
                    next_delay_ms = config.delay_before(attempt + 1).as_millis() as u64,
                    "Recoverable error, will retry"
                );
                on_retry(attempt + 1, &e);
            }
            Err(e) => {
                if attempt >= max_attempts {
                    error!(
                        operation = operation_name,
                        attempts = attempt,
                        error = %e,
                        "Operation failed after all retry attempts"
                    );
                } else {
                    error!(
                        operation = operation_name,
                        error = %e,
                        category = e.category(),
                        "Non-recoverable error, not retrying"
                    );
                }
                return Err(e);
            }
        }
    }
}

fn jittered(delay: Duration, use_jitter: bool) -> Duration {
    if !use_jitter || delay.is_zero() {
        return delay;
    }
    let jitter = (rand::random::<f64>() - 0.5) * 0.2;
    let millis = delay.as_millis() as f64;
    Duration::from_millis((millis * (1.0 + jitter)) as u64)
}

/// Re-evaluate `condition` every `interval` until it returns true
///
/// The condition is checked immediately, so an already-satisfied condition
/// returns without sleeping. Fails with [`CoordinatorError::OperationTimeout`]
/// once `timeout` has elapsed.
pub async fn poll_until<F>(
    operation_name: &str,
    interval: Duration,
    timeout: Duration,
    mut condition: F,
) -> CoordinatorResult<()>
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    let mut checks: u32 = 0;

    loop {
        checks += 1;
        if condition() {
            debug!(operation = operation_name, checks = checks, "Condition satisfied");
            return Ok(());
        }

        let now = Instant::now();
        if now >= deadline {
            warn!(
                operation = operation_name,
                checks = checks,
                timeout_ms = timeout.as_millis() as u64,
                "Condition not met before deadline"
            );
            return Err(CoordinatorError::OperationTimeout {
                duration_ms: timeout.as_millis() as u64,
            });
        }

        sleep(interval.min(deadline - now)).await;
    }
}

/// Attach a hard deadline to a future
pub async fn with_timeout<T, F>(
    operation_name: &str,
    timeout: Duration,
    future: F,
) -> CoordinatorResult<T>
where
    F: Future<Output = CoordinatorResult<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => {
            error!(
                operation = operation_name,
                timeout_ms = timeout.as_millis() as u64,
                "Operation timed out"
            );
            Err(CoordinatorError::OperationTimeout {
                duration_ms: timeout.as_millis() as u64,
            })
        }
    }
}
