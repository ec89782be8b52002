//! Bounded retry with exponential backoff and random jitter.
//!
//! [`attempt`] runs an async operation up to `max_attempts` times. The wait
//! after failed attempt `n` is `min(base * 2^(n-1), max_delay)` plus a
//! uniformly random `0..=base` jitter. Errors wrapped with [`permanent`] end
//! the loop at once (e.g. an HTTP 401 that no amount of retrying will fix).
//!
//! ```rust,no_run
//! # async fn demo() {
//! use std::time::Duration;
//! use tenant_rag::retry::{attempt, RetryPolicy};
//!
//! let policy = RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(2));
//! let value = attempt(&policy, "fetch", |_n| async { Ok::<_, anyhow::Error>(42) }).await;
//! assert_eq!(value.unwrap(), 42);
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;

use crate::config::LabelingConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            jitter: true,
        }
    }

    /// Same policy without the random component; used where tests need
    /// exact timings.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    pub fn for_labeling(config: &LabelingConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
        )
    }

    /// Policy for HTTP providers configured only by a retry count.
    pub fn for_http(max_retries: u32) -> Self {
        Self::new(
            max_retries.saturating_add(1),
            Duration::from_secs(1),
            Duration::from_secs(30),
        )
    }

    /// Backoff after failed attempt `attempt` (1-based), before jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    fn jitter(&self) -> Duration {
        if !self.jitter {
            return Duration::ZERO;
        }
        let base_ms = self.base_delay.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=base_ms))
    }
}

/// Every attempt failed, or one failed permanently.
#[derive(Error, Debug)]
#[error("{what} failed after {attempts} attempt(s): {last:#}")]
pub struct Exhausted {
    pub what: String,
    pub attempts: u32,
    pub last: anyhow::Error,
}

/// Marker for an error that must not be retried.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct Permanent {
    pub message: String,
}

/// Wrap an error so [`attempt`] stops immediately.
pub fn permanent(err: impl std::fmt::Display) -> anyhow::Error {
    Permanent {
        message: err.to_string(),
    }
    .into()
}

/// Also true for an [`Exhausted`] whose last error was permanent, so an
/// inner `attempt` that gave up on a 401 also stops any outer loop.
pub fn is_permanent(err: &anyhow::Error) -> bool {
    err.downcast_ref::<Permanent>().is_some()
        || err
            .downcast_ref::<Exhausted>()
            .is_some_and(|exhausted| is_permanent(&exhausted.last))
}

/// Run `op` until it succeeds, fails permanently, or the policy runs out.
///
/// `op` receives the 1-based attempt number. No sleep follows the last
/// attempt.
pub async fn attempt<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, Exhausted>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut n = 1;
    loop {
        match op(n).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if is_permanent(&err) || n >= policy.max_attempts {
                    return Err(Exhausted {
                        what: what.to_string(),
                        attempts: n,
                        last: err,
                    });
                }
                let delay = policy.delay_for_attempt(n) + policy.jitter();
                tracing::warn!(
                    what,
                    attempt = n,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                n += 1;
            }
        }
    }
}
