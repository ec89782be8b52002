//! Dual request/token budget for the external labeling service.
//!
//! [`RateLimiter::acquire`] suspends until both budgets have room:
//!
//! - **Requests**: fewer than `max_requests_per_minute` admissions in the
//!   trailing 60 seconds (sliding log of timestamps).
//! - **Tokens**: the token counter plus the request's estimate stays within
//!   `max_tokens_per_minute`. The counter resets once 60 seconds have passed
//!   since the first admission of the current period.
//!
//! The check and the recording of an admission happen under one lock, so two
//! waiters can never both take the last slot. A request larger than the whole
//! token budget is admitted when the counter is empty; otherwise it could
//! never run.
//!
//! Time comes from `tokio::time`, so tests drive the limiter with a paused
//! clock instead of real sleeps.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

use crate::config::RateLimitConfig;

pub const WINDOW: Duration = Duration::from_secs(60);

const DEFAULT_POLL: Duration = Duration::from_secs(1);

/// Usage at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateSnapshot {
    pub requests_in_window: usize,
    pub tokens_used: u64,
}

struct Budget {
    requests: VecDeque<Instant>,
    tokens_used: u64,
    period_start: Option<Instant>,
}

pub struct RateLimiter {
    max_requests: usize,
    max_tokens: u64,
    poll: Duration,
    budget: Mutex<Budget>,
}

enum Admission {
    Granted,
    Wait(Duration),
}

impl RateLimiter {
    pub fn new(max_requests_per_minute: usize, max_tokens_per_minute: u64) -> Self {
        Self {
            max_requests: max_requests_per_minute.max(1),
            max_tokens: max_tokens_per_minute.max(1),
            poll: DEFAULT_POLL,
            budget: Mutex::new(Budget {
                requests: VecDeque::new(),
                tokens_used: 0,
                period_start: None,
            }),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.max_requests_per_minute, config.max_tokens_per_minute)
    }

    /// Longest single sleep between rechecks.
    pub fn with_poll_interval(mut self, poll: Duration) -> Self {
        self.poll = poll.max(Duration::from_millis(1));
        self
    }

    /// Wait until one request of `tokens` fits both budgets, then record it.
    ///
    /// Never fails. Dropping the future while it waits records nothing.
    pub async fn acquire(&self, tokens: u64) {
        let mut waited = false;
        loop {
            match self.try_admit(tokens, Instant::now()) {
                Admission::Granted => {
                    if waited {
                        tracing::debug!(tokens, "rate budget available");
                    }
                    return;
                }
                Admission::Wait(delay) => {
                    if !waited {
                        tracing::info!(
                            tokens,
                            wait_ms = delay.as_millis() as u64,
                            "rate budget exhausted, waiting"
                        );
                        waited = true;
                    }
                    tokio::time::sleep(delay.min(self.poll)).await;
                }
            }
        }
    }

    pub fn snapshot(&self) -> RateSnapshot {
        let now = Instant::now();
        let mut budget = self.lock();
        expire(&mut budget, now);
        RateSnapshot {
            requests_in_window: budget.requests.len(),
            tokens_used: budget.tokens_used,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Budget> {
        // The budget holds no invariant a panic could break halfway.
        self.budget.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn try_admit(&self, tokens: u64, now: Instant) -> Admission {
        let mut budget = self.lock();
        expire(&mut budget, now);

        let mut wait = Duration::ZERO;
        if budget.requests.len() >= self.max_requests {
            if let Some(oldest) = budget.requests.front() {
                wait = wait.max((*oldest + WINDOW).saturating_duration_since(now));
            }
        }
        let fits = budget.tokens_used == 0
            || budget.tokens_used.saturating_add(tokens) <= self.max_tokens;
        if !fits {
            if let Some(start) = budget.period_start {
                wait = wait.max((start + WINDOW).saturating_duration_since(now));
            }
        }

        if budget.requests.len() < self.max_requests && fits {
            budget.requests.push_back(now);
            budget.tokens_used = budget.tokens_used.saturating_add(tokens);
            budget.period_start.get_or_insert(now);
            Admission::Granted
        } else {
            Admission::Wait(wait.max(Duration::from_millis(1)))
        }
    }
}

fn expire(budget: &mut Budget, now: Instant) {
    while let Some(front) = budget.requests.front() {
        if now.saturating_duration_since(*front) >= WINDOW {
            budget.requests.pop_front();
        } else {
            break;
        }
    }
    if let Some(start) = budget.period_start {
        if now.saturating_duration_since(start) >= WINDOW {
            budget.tokens_used = 0;
            budget.period_start = None;
        }
    }
}
