//! Retry accounting and backoff delay policy.

use rand::Rng;
use std::time::Duration;

/// Capped exponential backoff policy for failed tasks.
///
/// The delay for attempt `n` is `base * 2^(n-1)`, capped at `cap`. The policy
/// is a pure function of the attempt number, pluggable independently of the
/// claim machinery; deployments that want to avoid synchronized retry storms
/// can layer jitter on top via [`RetryPolicy::jittered_delay_for_attempt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    base: Duration,
    cap: Duration,
    max_attempts: u32,
}

impl RetryPolicy {
    /// Doubling beyond this exponent always lands on the cap.
    const MAX_EXPONENT: u32 = 31;

    /// Creates a policy with the given base delay, cap, and attempt budget.
    #[must_use]
    pub const fn new(base: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            cap,
            max_attempts,
        }
    }

    /// Returns the configured attempt budget.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the delay before the next attempt after `attempt` failures.
    ///
    /// Attempt numbers start at 1; zero is treated as 1 so a caller that has
    /// not yet incremented its counter still receives the base delay.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(Self::MAX_EXPONENT);
        let factor = 1_u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Returns a uniformly jittered delay in `[0, delay_for_attempt(attempt)]`.
    #[must_use]
    pub fn jittered_delay_for_attempt(&self, attempt: u32, rng: &mut impl Rng) -> Duration {
        let upper = self.delay_for_attempt(attempt);
        if upper.is_zero() {
            return Duration::ZERO;
        }
        rng.gen_range(Duration::ZERO..=upper)
    }

    /// Returns whether `attempts` has reached the configured budget.
    #[must_use]
    pub const fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

impl Default for RetryPolicy {
    /// Deployment defaults: 5 s base, 5 min cap, 5 attempts.
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(300), 5)
    }
}
