//! Backoff policies.
//!
//! A [`Backoff`] answers one question after each failed attempt: how long to
//! wait before the next one, or whether to stop. It has no notion of time or
//! I/O, so sequences can be inspected directly in tests.

use std::time::Duration;

/// Default interval before the first retry.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Default cap for exponential growth.
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(60);

/// How delays grow between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffKind {
    /// Every retry waits `interval`.
    Constant,
    /// Retry `n` (0-indexed) waits `interval * 2^n`, capped at `max_interval`.
    Exponential,
}

/// Configuration for a backoff sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub kind: BackoffKind,

    /// Delay before the first retry.
    pub interval: Duration,

    /// Upper bound for exponential delays. Ignored for constant backoff.
    pub max_interval: Duration,

    /// Total number of attempts, including the first one. `None` retries
    /// forever.
    pub max_attempts: Option<u32>,
}

impl BackoffPolicy {
    /// Constant backoff with the default one-second interval.
    pub fn constant(max_attempts: Option<u32>) -> Self {
        BackoffPolicy {
            kind: BackoffKind::Constant,
            interval: DEFAULT_INTERVAL,
            max_interval: DEFAULT_INTERVAL,
            max_attempts,
        }
    }

    /// Exponential backoff starting at one second.
    pub fn exponential(max_attempts: Option<u32>) -> Self {
        BackoffPolicy {
            kind: BackoffKind::Exponential,
            interval: DEFAULT_INTERVAL,
            max_interval: DEFAULT_MAX_INTERVAL,
            max_attempts,
        }
    }

    /// Picks constant or exponential backoff from a flag.
    pub fn from_flag(exponential: bool, max_attempts: Option<u32>) -> Self {
        if exponential {
            Self::exponential(max_attempts)
        } else {
            Self::constant(max_attempts)
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_interval(mut self, max_interval: Duration) -> Self {
        self.max_interval = max_interval;
        self
    }

    /// Delay before retry `retry` (0-indexed).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        match self.kind {
            BackoffKind::Constant => self.interval,
            BackoffKind::Exponential => {
                let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
                self.interval
                    .saturating_mul(factor)
                    .min(self.max_interval.max(self.interval))
            }
        }
    }

    /// Starts a fresh sequence.
    pub fn start(&self) -> Backoff {
        Backoff {
            policy: *self,
            attempts: 0,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::exponential(Some(8))
    }
}

/// A running backoff sequence.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempts: u32,
}

impl Backoff {
    /// Records one finished attempt and returns the wait before the next, or
    /// `None` when the attempt budget is spent.
    ///
    /// A budget of zero behaves like a budget of one: the first attempt always
    /// runs.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempts = self.attempts.saturating_add(1);
        if matches!(self.policy.max_attempts, Some(max) if self.attempts >= max) {
            return None;
        }
        Some(self.policy.delay_for_retry(self.attempts - 1))
    }

    /// Attempts recorded so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
