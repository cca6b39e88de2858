/// Reconnect backoff policy
///
/// Pure delay schedule for bounded exponential backoff. The policy owns no
/// timers; callers ask for the delay of a given attempt and sleep themselves.
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay before the first retry attempt
    pub base_delay: Duration,
    /// Ceiling applied to the exponential schedule
    pub max_delay: Duration,
    /// Attempts past this number are not scheduled
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts,
        }
    }

    /// Delay before retry attempt `attempt` (1-based).
    ///
    /// Returns `None` once the attempt budget is exhausted; the caller stops
    /// scheduling and settles into its give-up state. Attempt 0 is not a
    /// retry and also yields `None`.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let exp = attempt - 1;
        let base_ms = self.base_delay.as_millis() as u64;
        // Saturate instead of overflowing for absurd attempt numbers
        let scaled = base_ms.saturating_mul(1u64.checked_shl(exp).unwrap_or(u64::MAX));
        let capped = scaled.min(self.max_delay.as_millis() as u64);
        Some(Duration::from_millis(capped))
    }

    /// True if `attempt` (1-based) is still within the attempt budget.
    pub fn allows(&self, attempt: u32) -> bool {
        attempt >= 1 && attempt <= self.max_attempts
    }
}
