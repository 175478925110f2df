//! Capped linear backoff shared by process restarts and bus retries.
//!
//! The delay before attempt `n` (1-based) is `min(n × base, max)`. Both
//! subsystems use this one formula; they only differ in configuration.
//!
//! ```rust
//! use std::time::Duration;
//! use robosched::core::BackoffPolicy;
//!
//! let backoff = BackoffPolicy::new(Duration::from_secs(2), Duration::from_secs(30));
//! assert_eq!(backoff.delay(1), Duration::from_secs(2));
//! assert_eq!(backoff.delay(3), Duration::from_secs(6));
//! assert_eq!(backoff.delay(100), Duration::from_secs(30));
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Capped linear backoff policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay unit in milliseconds.
    pub base_ms: u64,
    /// Delay cap in milliseconds.
    pub max_ms: u64,
}

impl BackoffPolicy {
    /// Build a policy from durations.
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base_ms: u64::try_from(base.as_millis()).unwrap_or(u64::MAX),
            max_ms: u64::try_from(max.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Policy for process restarts: 2s steps capped at 30s.
    #[must_use]
    pub const fn restarts() -> Self {
        Self {
            base_ms: 2_000,
            max_ms: 30_000,
        }
    }

    /// Policy for bus retries: 1ms steps capped at 50ms.
    #[must_use]
    pub const fn bus_retries() -> Self {
        Self {
            base_ms: 1,
            max_ms: 50,
        }
    }

    /// Delay before the given 1-based attempt. Non-decreasing in `attempt`.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let ms = self.base_ms.saturating_mul(u64::from(attempt)).min(self.max_ms);
        Duration::from_millis(ms)
    }

    /// Validate the policy.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_ms < self.base_ms {
            return Err(format!(
                "backoff max_ms ({}) must be >= base_ms ({})",
                self.max_ms, self.base_ms
            ));
        }
        Ok(())
    }
}
