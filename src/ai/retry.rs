//! Retry policy for failed AI requests.
//!
//! Backoff delays use fixed formulas (no jitter) so paused-clock tests can
//! assert exact timing.
//!
//! ```
//! use canvas_history::ai::retry::{BackoffStrategy, RetryPolicy};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::new(3, BackoffStrategy::Exponential {
//!     base_ms: 100,
//!     max_ms: 5000,
//! });
//!
//! assert_eq!(policy.delay(0), Duration::from_millis(100));
//! assert_eq!(policy.delay(1), Duration::from_millis(200));
//! assert_eq!(policy.delay(2), Duration::from_millis(400));
//! ```

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 500;
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 8_000;

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay before every retry.
    Fixed { delay_ms: u64 },
    /// `base_ms * 2^attempt`, capped at `max_ms`.
    Exponential { base_ms: u64, max_ms: u64 },
    /// `base_ms * (attempt + 1)`, capped at `max_ms`.
    Linear { base_ms: u64, max_ms: u64 },
}

/// How many times a failed request is retried, and how long to wait.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries (0 = fail on the first error).
    pub max_retries: u32,
    pub backoff: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_RETRIES,
            BackoffStrategy::Exponential {
                base_ms: DEFAULT_BACKOFF_BASE_MS,
                max_ms: DEFAULT_BACKOFF_MAX_MS,
            },
        )
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: BackoffStrategy) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            backoff: BackoffStrategy::Fixed { delay_ms: 0 },
        }
    }

    /// Delay before retry number `attempt` (0-indexed).
    pub fn delay(&self, attempt: u32) -> Duration {
        match &self.backoff {
            BackoffStrategy::Fixed { delay_ms } => Duration::from_millis(*delay_ms),
            BackoffStrategy::Exponential { base_ms, max_ms } => {
                let multiplier = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
                let delay = base_ms.saturating_mul(multiplier);
                Duration::from_millis(delay.min(*max_ms))
            }
            BackoffStrategy::Linear { base_ms, max_ms } => {
                let delay = base_ms.saturating_mul(u64::from(attempt) + 1);
                Duration::from_millis(delay.min(*max_ms))
            }
        }
    }

    /// Sum of every retry delay, for timeout budgeting.
    pub fn total_max_delay(&self) -> Duration {
        (0..self.max_retries).map(|i| self.delay(i)).sum()
    }

    pub fn validate(&self) -> Result<()> {
        match self.backoff {
            BackoffStrategy::Exponential { base_ms, max_ms }
            | BackoffStrategy::Linear { base_ms, max_ms }
                if max_ms < base_ms =>
            {
                Err(Error::Validation(format!(
                    "backoff cap {}ms is below the base delay {}ms",
                    max_ms, base_ms
                )))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_is_capped() {
        let policy = RetryPolicy::new(
            10,
            BackoffStrategy::Exponential {
                base_ms: 500,
                max_ms: 3_000,
            },
        );
        assert_eq!(policy.delay(0), Duration::from_millis(500));
        assert_eq!(policy.delay(2), Duration::from_millis(2_000));
        assert_eq!(policy.delay(3), Duration::from_millis(3_000));
        assert_eq!(policy.delay(200), Duration::from_millis(3_000));
    }

    #[test]
    fn test_linear_and_fixed() {
        let linear = RetryPolicy::new(
            3,
            BackoffStrategy::Linear {
                base_ms: 100,
                max_ms: 250,
            },
        );
        assert_eq!(linear.delay(0), Duration::from_millis(100));
        assert_eq!(linear.delay(1), Duration::from_millis(200));
        assert_eq!(linear.delay(2), Duration::from_millis(250));
        assert_eq!(linear.total_max_delay(), Duration::from_millis(550));

        let fixed = RetryPolicy::new(2, BackoffStrategy::Fixed { delay_ms: 40 });
        assert_eq!(fixed.total_max_delay(), Duration::from_millis(80));
        assert_eq!(RetryPolicy::no_retry().total_max_delay(), Duration::ZERO);
    }

    #[test]
    fn test_validate_rejects_inverted_cap() {
        let policy = RetryPolicy::new(
            1,
            BackoffStrategy::Exponential {
                base_ms: 1_000,
                max_ms: 10,
            },
        );
        assert!(policy.validate().is_err());
        assert!(RetryPolicy::default().validate().is_ok());
    }
}
