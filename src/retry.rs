//! Retry policy and backoff calculation
//!
//! Two flavours of backoff are used by the core:
//!
//! - **Exponential** for agent lifecycle retries:
//!   `delay = min(2^retry_count * base, max)`
//! - **Linear** for execution-engine unit retries:
//!   `delay = base * retry_count`
//!
//! Errors classify themselves through [`RetryableError`] so callers can skip
//! retrying permanent failures.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the delay grows with each retry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// `base * 2^retry_count`
    #[default]
    Exponential,

    /// `base * retry_count`
    Linear,
}

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retries (not including the initial attempt)
    pub max_retries: u32,

    /// Base delay
    pub base_delay: Duration,

    /// Upper bound for any single delay
    pub max_delay: Duration,

    /// Growth curve
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300), // 5 minutes
            backoff: Backoff::Exponential,
        }
    }
}

impl RetryPolicy {
    /// Exponential policy used by the agent lifecycle
    pub fn exponential(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            backoff: Backoff::Exponential,
        }
    }

    /// Linear policy used by the execution engine
    pub fn linear(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: Duration::MAX,
            backoff: Backoff::Linear,
        }
    }

    /// Calculate the delay before the retry numbered `retry_count` (1-based)
    pub fn backoff_duration(&self, retry_count: u32) -> Duration {
        let base_ms = self.base_delay.as_millis();
        let raw_ms = match self.backoff {
            Backoff::Exponential => {
                // 2^n overflows u128 far past any sane cap; clamp the exponent
                let factor = 1u128 << retry_count.min(64);
                base_ms.saturating_mul(factor)
            }
            Backoff::Linear => base_ms.saturating_mul(retry_count as u128),
        };
        let capped = raw_ms.min(self.max_delay.as_millis());

        Duration::from_millis(capped.min(u64::MAX as u128) as u64)
    }

    /// Whether another attempt is allowed after `retries` failures
    pub fn allows_retry(&self, retries: u32) -> bool {
        retries <= self.max_retries
    }
}

/// Retry classification for errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the operation
    Retry,
    /// Retry after a specific duration
    RetryAfter(Duration),
    /// Don't retry, the error is permanent
    NoRetry,
}

/// Trait for errors that can indicate whether to retry
pub trait RetryableError {
    /// Determine if this error should be retried
    fn retry_decision(&self) -> RetryDecision;
}
