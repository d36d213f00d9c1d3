//! Bounded exponential backoff on throttling
//!
//! Only `BackendError::Throttled` is retried. Each throttle sleeps `base_delay * 2^attempt`,
//! starting at attempt 0, until `max_attempts` throttles have been absorbed.
use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use serde::{Deserialize, Serialize};

use crate::invocation::errors::BackendError;

/// What to do once every attempt was throttled
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionPolicy {
    /// Return an empty, zero cost result flagged as degraded
    #[default]
    Degrade,
    /// Return `InvocationError::RetriesExhausted`
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Delay before the first retry; doubles on every subsequent throttle
    pub base_delay: Duration,
    pub max_attempts: u32,
    pub on_exhausted: ExhaustionPolicy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_attempts: 15,
            on_exhausted: ExhaustionPolicy::Degrade,
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> ThrottleBackoff {
        ThrottleBackoff {
            base_delay: self.base_delay,
            max_attempts: self.max_attempts,
            attempt: 0,
        }
    }
}

/// Deterministic doubling backoff without jitter
#[derive(Debug, Clone)]
pub struct ThrottleBackoff {
    base_delay: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl ThrottleBackoff {
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Backoff for ThrottleBackoff {
    fn next_backoff(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }

        let delay = 1u32
            .checked_shl(self.attempt)
            .map_or(Duration::MAX, |factor| self.base_delay.saturating_mul(factor));
        self.attempt += 1;

        Some(delay)
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// How a retried operation ended
#[derive(Debug)]
pub enum RetryOutcome<T> {
    Succeeded(T),
    Failed(BackendError),
    /// Throttled `attempts` times in a row
    Exhausted { attempts: u32 },
}

/// Runs `op` until it succeeds, fails with something other than throttling, or the attempts run
/// out. Sleeps between attempts with `tokio::time::sleep`.
pub async fn retry_throttled<T, F, Fut>(config: &RetryConfig, mut op: F) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    let mut backoff = config.backoff();

    loop {
        match op().await {
            Ok(value) => return RetryOutcome::Succeeded(value),
            Err(err) if err.is_throttling() => {
                let attempt = backoff.attempt();
                let Some(delay) = backoff.next_backoff() else {
                    return RetryOutcome::Exhausted { attempts: attempt };
                };

                tracing::warn!(
                    attempt = attempt + 1,
                    max_attempts = config.max_attempts,
                    delay_secs = delay.as_secs_f64(),
                    error = %err,
                    "Throttled by model endpoint, backing off"
                );
                tokio::time::sleep(delay).await;

                if backoff.attempt() >= config.max_attempts {
                    return RetryOutcome::Exhausted {
                        attempts: backoff.attempt(),
                    };
                }
            }
            Err(err) => return RetryOutcome::Failed(err),
        }
    }
}
