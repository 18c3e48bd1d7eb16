//! Retry policy shared by every request the fetcher makes.

use rand::Rng;
use shared::config::{BackoffKind, RetryConfig};
use std::time::Duration;

/// How the delay grows between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// Same delay before every retry
    Fixed(Duration),
    /// `base * 2^(retry - 1)`, capped at `max`
    Exponential { base: Duration, max: Duration },
}

/// Retry policy: `{max_attempts, backoff, jitter}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one; at least 1
    pub max_attempts: u32,
    pub backoff: BackoffStrategy,
    /// Upper bound of the random delay added to each backoff
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        let base = Duration::from_millis(config.base_delay_ms);
        let backoff = match config.backoff {
            BackoffKind::Fixed => BackoffStrategy::Fixed(base),
            BackoffKind::Exponential => BackoffStrategy::Exponential {
                base,
                max: Duration::from_millis(config.max_delay_ms.max(config.base_delay_ms)),
            },
        };

        Self {
            max_attempts: config.max_attempts.max(1),
            backoff,
            jitter: Duration::from_millis(config.jitter_ms),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: BackoffStrategy::Fixed(Duration::ZERO),
            jitter: Duration::ZERO,
        }
    }

    /// Whether another attempt is allowed after `attempt` (1-based) failed
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Backoff before retry number `retry` (1-based), without jitter
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        match self.backoff {
            BackoffStrategy::Fixed(delay) => delay,
            BackoffStrategy::Exponential { base, max } => {
                let exponent = retry.saturating_sub(1).min(16);
                base.saturating_mul(1u32 << exponent).min(max)
            }
        }
    }

    /// Backoff plus a random share of the configured jitter
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.backoff_delay(retry) + random_jitter(self.jitter)
    }
}

/// Uniform random duration in `[0, max]`
pub(crate) fn random_jitter(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    let millis = rand::thread_rng().gen_range(0..=max.as_millis() as u64);
    Duration::from_millis(millis)
}
