//! # Retry Backoff
//!
//! Requeue delays for transient failures, derived from how long a resource
//! has been failing rather than from an in-memory counter. A controller
//! restart or a leadership change therefore resumes the same schedule.
//!
//! The delay doubles with the time spent failing: after `t` seconds of
//! failure the next attempt comes `clamp(t, base, max_interval)` later, so
//! attempts land at roughly `base, 2·base, 4·base, ...` until the interval
//! ceiling is hit. Once `max_duration` has elapsed the caller gives up.

use std::time::Duration;

/// Stateless exponential retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Smallest delay between attempts
    pub base: Duration,
    /// Largest delay between attempts
    pub max_interval: Duration,
    /// Failing longer than this is terminal
    pub max_duration: Duration,
}

impl Default for RetryPolicy {
    /// 5s base, 5m ceiling, give up after 1h
    fn default() -> Self {
        Self {
            base: Duration::from_secs(5),
            max_interval: Duration::from_secs(300),
            max_duration: Duration::from_secs(3600),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt after failing for `elapsed`.
    #[must_use]
    pub fn requeue_after(&self, elapsed: Duration) -> Duration {
        let ceiling = self.max_interval.max(self.base);
        elapsed.clamp(self.base, ceiling)
    }

    /// True once retrying should stop.
    #[must_use]
    pub fn is_exhausted(&self, elapsed: Duration) -> bool {
        elapsed >= self.max_duration
    }
}
