// src/retry.rs
//! Delay schedules: full-jitter exponential backoff for publish retries and a
//! deterministic geometric cooldown for the scheduler's Backoff state.

use rand::Rng;
use std::time::Duration;

use crate::config::{BackoffConfig, PublishConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&PublishConfig::default())
    }
}

impl From<&PublishConfig> for RetryPolicy {
    fn from(c: &PublishConfig) -> Self {
        Self {
            max_attempts: c.max_attempts.max(1),
            base_delay_ms: c.base_delay_ms,
            max_delay_ms: c.max_delay_ms,
        }
    }
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms,
        }
    }

    /// Upper bound of the wait after failed attempt `attempt` (1-based):
    /// `min(base * 2^(attempt-1), max)`.
    pub fn ceiling_for_attempt(&self, attempt: u32) -> u64 {
        if attempt == 0 {
            return 0;
        }
        let factor = 1_u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
        self.base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms)
    }

    /// Full jitter: uniform in `0..=ceiling_for_attempt(attempt)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let cap = self.ceiling_for_attempt(attempt);
        if cap == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=cap))
    }

    pub const fn can_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Scheduler cooldown after `consecutive_failures` fatal cycles:
/// `base * factor^(n-1)`, capped at `max`.
pub fn cooldown(cfg: &BackoffConfig, consecutive_failures: u32) -> Duration {
    let n = consecutive_failures.max(1);
    let mut secs = cfg.base_secs;
    for _ in 1..n {
        secs = secs.saturating_mul(u64::from(cfg.factor.max(1)));
        if secs >= cfg.max_secs {
            break;
        }
    }
    Duration::from_secs(secs.min(cfg.max_secs))
}
