//! Retry policy — attempt budget and exponential back-off.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Per-step retry configuration.
///
/// The delay for attempt *n* (1-based) is
/// `min(base_delay * multiplier^(n-1), max_delay)` seconds. The delay is
/// applied *after* a failed attempt and *before* the next one; nothing
/// sleeps after the final attempt.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempt budget, including the first run. Minimum 1.
    pub max_attempts: u32,
    /// Delay after the first failed attempt, in seconds.
    pub base_delay: f64,
    /// Back-off growth factor per attempt. Minimum 1.
    pub multiplier: f64,
    /// Upper bound on any single delay, in seconds.
    pub max_delay: f64,
}

impl Default for RetryPolicy {
    /// One attempt, no retry.
    fn default() -> Self {
        Self {
            max_attempts: 1,
            base_delay: 0.0,
            multiplier: 1.0,
            max_delay: 60.0,
        }
    }
}

impl RetryPolicy {
    /// Build a policy, clamping out-of-range values into the valid
    /// domain instead of panicking.
    pub fn new(max_attempts: u32, base_delay: f64, multiplier: f64, max_delay: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: base_delay.max(0.0),
            multiplier: multiplier.max(1.0),
            max_delay: max_delay.max(0.0),
        }
    }

    /// Convenience: `attempts` tries with a fixed back-off base and
    /// doubling growth.
    pub fn exponential(max_attempts: u32, base_delay: f64) -> Self {
        Self::new(max_attempts, base_delay, 2.0, 60.0)
    }

    /// Back-off to sleep after failed attempt `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let raw = self.base_delay * self.multiplier.powi(exponent as i32);
        Duration::from_secs_f64(raw.min(self.max_delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_delay_is_base_delay() {
        let policy = RetryPolicy::new(3, 0.5, 2.0, 60.0);
        assert_eq!(policy.delay(1), Duration::from_secs_f64(0.5));
    }

    #[test]
    fn delays_grow_by_multiplier() {
        let policy = RetryPolicy::new(4, 0.01, 2.0, 60.0);
        assert_eq!(policy.delay(1), Duration::from_secs_f64(0.01));
        assert_eq!(policy.delay(2), Duration::from_secs_f64(0.02));
        assert_eq!(policy.delay(3), Duration::from_secs_f64(0.04));
    }

    #[test]
    fn delay_is_capped_at_max() {
        let policy = RetryPolicy::new(10, 1.0, 10.0, 5.0);
        assert_eq!(policy.delay(5), Duration::from_secs_f64(5.0));
    }

    #[test]
    fn delays_are_non_decreasing_and_bounded() {
        let policy = RetryPolicy::new(8, 0.1, 3.0, 2.0);
        let mut previous = Duration::ZERO;
        for attempt in 1..=8 {
            let d = policy.delay(attempt);
            assert!(d >= previous);
            assert!(d <= Duration::from_secs_f64(2.0));
            previous = d;
        }
    }

    #[test]
    fn default_is_single_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.delay(1), Duration::ZERO);
    }

    #[test]
    fn constructor_clamps_invalid_values() {
        let policy = RetryPolicy::new(0, -1.0, 0.5, -2.0);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.base_delay, 0.0);
        assert_eq!(policy.multiplier, 1.0);
        assert_eq!(policy.max_delay, 0.0);
    }
}
