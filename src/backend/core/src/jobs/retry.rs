//! Retry policy and backoff for job dispatch.

use serde::{Deserialize, Serialize};
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// Backoff Strategy
// ═══════════════════════════════════════════════════════════════════════════════

/// Strategy for calculating retry delays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed {
        #[serde(with = "humantime_serde")]
        delay: Duration,
    },
    /// Exponential increase in delay (initial * multiplier^attempt), capped
    Exponential {
        #[serde(with = "humantime_serde")]
        initial: Duration,
        #[serde(with = "humantime_serde")]
        max: Duration,
        multiplier: f64,
    },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Exponential {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl BackoffStrategy {
    /// Calculate the delay after a failed attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => *delay,
            Self::Exponential {
                initial,
                max,
                multiplier,
            } => {
                let factor = multiplier.max(1.0).powi(attempt as i32);
                let delay = initial.as_secs_f64() * factor;
                Duration::from_secs_f64(delay.min(max.as_secs_f64()))
            }
        }
    }

    /// Create a fixed backoff strategy.
    pub fn fixed(delay: Duration) -> Self {
        Self::Fixed { delay }
    }

    /// No delay between attempts.
    pub fn none() -> Self {
        Self::Fixed {
            delay: Duration::ZERO,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Retry Policy
// ═══════════════════════════════════════════════════════════════════════════════

/// Bounded retry behaviour for a single job dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Upper bound for one attempt; an attempt that exceeds it counts as transient
    #[serde(with = "humantime_serde")]
    pub attempt_timeout: Duration,
    /// Backoff strategy for calculating delays
    pub backoff: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(10),
            backoff: BackoffStrategy::default(),
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Create a policy with a specific number of attempts.
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Default::default()
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Whether another attempt is allowed after `attempts_made` attempts.
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}
