//! Poll policies and backoff strategies

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, VerifyError};

/// Computes the delay before the next poll attempt.
///
/// `attempt` is 1-based and names the attempt that just failed.
pub trait Backoff: Send + Sync + fmt::Debug {
    fn delay(&self, attempt: u32, interval: Duration) -> Duration;
}

/// Waits the same interval between every attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedBackoff;

impl Backoff for FixedBackoff {
    fn delay(&self, _attempt: u32, interval: Duration) -> Duration {
        interval
    }
}

/// Multiplies the interval after every attempt, capped at `max_interval`.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    pub multiplier: f64,
    pub max_interval: Duration,
}

impl ExponentialBackoff {
    pub fn new(multiplier: f64, max_interval: Duration) -> Self {
        Self {
            multiplier: multiplier.max(1.0),
            max_interval,
        }
    }
}

impl Backoff for ExponentialBackoff {
    fn delay(&self, attempt: u32, interval: Duration) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        if exponent == 0 {
            return interval;
        }
        let scaled = interval.as_nanos() as f64 * self.multiplier.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_interval.as_nanos() as f64 {
            return self.max_interval.max(interval);
        }
        Duration::from_nanos(scaled.round() as u64)
    }
}

/// Governs how long and how often a condition is re-evaluated.
///
/// Invariant: `timeout >= interval` and both are non-zero.
#[derive(Clone)]
pub struct PollPolicy {
    timeout: Duration,
    interval: Duration,
    max_attempts: Option<u32>,
    backoff: Arc<dyn Backoff>,
}

impl PollPolicy {
    pub fn new(timeout: Duration, interval: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(VerifyError::InvalidPolicy {
                reason: "interval must be greater than zero".to_string(),
            });
        }
        if timeout < interval {
            return Err(VerifyError::InvalidPolicy {
                reason: format!(
                    "timeout {:?} must be at least the interval {:?}",
                    timeout, interval
                ),
            });
        }
        Ok(Self {
            timeout,
            interval,
            max_attempts: None,
            backoff: Arc::new(FixedBackoff),
        })
    }

    pub fn from_millis(timeout_ms: u64, interval_ms: u64) -> Result<Self> {
        Self::new(
            Duration::from_millis(timeout_ms),
            Duration::from_millis(interval_ms),
        )
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Result<Self> {
        if max_attempts == 0 {
            return Err(VerifyError::InvalidPolicy {
                reason: "max_attempts must be greater than zero".to_string(),
            });
        }
        self.max_attempts = Some(max_attempts);
        Ok(self)
    }

    pub fn with_backoff(mut self, backoff: Arc<dyn Backoff>) -> Self {
        self.backoff = backoff;
        self
    }

    /// Same interval and backoff, with the timeout replaced.
    ///
    /// The interval shrinks to the new timeout when it would otherwise
    /// break the `timeout >= interval` invariant.
    pub fn with_timeout(&self, timeout: Duration) -> Result<Self> {
        let interval = self.interval.min(timeout);
        let mut policy = Self::new(timeout, interval)?;
        policy.max_attempts = self.max_attempts;
        policy.backoff = Arc::clone(&self.backoff);
        Ok(policy)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    pub fn next_delay(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt, self.interval)
    }
}

impl fmt::Debug for PollPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollPolicy")
            .field("timeout", &self.timeout)
            .field("interval", &self.interval)
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .finish()
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            interval: Duration::from_secs(2),
            max_attempts: None,
            backoff: Arc::new(FixedBackoff),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn rejects_zero_interval() {
        assert!(matches!(
            PollPolicy::from_millis(1000, 0),
            Err(VerifyError::InvalidPolicy { .. })
        ));
    }

    #[test]
    fn rejects_timeout_shorter_than_interval() {
        let err = PollPolicy::from_millis(100, 500).unwrap_err();
        assert!(err.to_string().contains("must be at least the interval"));
    }

    #[test]
    fn with_timeout_clamps_interval() {
        let policy = PollPolicy::from_millis(60_000, 2_000).unwrap();
        let shorter = policy.with_timeout(Duration::from_millis(500)).unwrap();
        assert_eq!(shorter.timeout(), Duration::from_millis(500));
        assert_eq!(shorter.interval(), Duration::from_millis(500));
    }

    #[test]
    fn exponential_backoff_grows_then_caps() {
        let backoff = ExponentialBackoff::new(2.0, Duration::from_millis(800));
        let interval = Duration::from_millis(100);
        assert_eq!(backoff.delay(1, interval), Duration::from_millis(100));
        assert_eq!(backoff.delay(2, interval), Duration::from_millis(200));
        assert_eq!(backoff.delay(3, interval), Duration::from_millis(400));
        assert_eq!(backoff.delay(5, interval), Duration::from_millis(800));
        assert_eq!(backoff.delay(200, interval), Duration::from_millis(800));
    }

    proptest! {
        #[test]
        fn exponential_delay_stays_between_interval_and_cap(
            attempt in 1u32..500,
            interval_ms in 1u64..5_000,
            cap_ms in 1u64..60_000,
            multiplier in 1.0f64..4.0,
        ) {
            let interval = Duration::from_millis(interval_ms);
            let cap = Duration::from_millis(cap_ms);
            let delay = ExponentialBackoff::new(multiplier, cap).delay(attempt, interval);
            prop_assert!(delay >= interval.min(cap));
            prop_assert!(delay <= cap.max(interval));
        }
    }
}
