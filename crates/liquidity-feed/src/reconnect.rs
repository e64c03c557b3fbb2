//! Reconnection policy with exponential backoff
//!
//! Delay doubles per consecutive failure and caps at `max_delay`; the caller
//! resets its attempt counter once a session synchronizes, so the next
//! failure starts from the base delay again.

use std::time::Duration;

/// Exponential backoff policy for reconnect attempts
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnection attempt
    pub initial_delay: Duration,
    /// Maximum delay between reconnection attempts
    pub max_delay: Duration,
    /// Multiplier per attempt (2.0 doubles the delay each time)
    pub multiplier: f64,
    /// Random jitter factor (0.0 to 1.0) to avoid thundering herd
    pub jitter: f64,
    /// Maximum number of attempts (None = unlimited)
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.0,
            max_attempts: None, // Retry forever
        }
    }
}

impl ReconnectPolicy {
    /// Create a policy with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set initial delay
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set backoff multiplier
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Set jitter factor
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Set maximum attempts
    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = Some(max);
        self
    }

    /// Calculate delay for a given attempt number (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return self.initial_delay;
        }

        let exponent = attempt.saturating_sub(1) as i32;
        let delay_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let delay = Duration::from_millis(delay_ms as u64);

        std::cmp::min(delay, self.max_delay)
    }

    /// Apply jitter to a base delay
    pub fn apply_jitter(&self, base: Duration) -> Duration {
        if self.jitter == 0.0 {
            return base;
        }

        let jitter_range = base.as_millis() as f64 * self.jitter;
        let jitter = rand::random::<f64>() * 2.0 * jitter_range - jitter_range;
        let adjusted_ms = (base.as_millis() as f64 + jitter).max(0.0) as u64;

        Duration::from_millis(adjusted_ms)
    }

    /// Get delay with jitter applied for a given attempt
    pub fn delay_with_jitter(&self, attempt: u32) -> Duration {
        let base = self.delay_for_attempt(attempt);
        self.apply_jitter(base)
    }

    /// Check if another reconnection attempt is allowed
    pub fn should_reconnect(&self, attempt: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempt < max,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.initial_delay, Duration::from_secs(2));
        assert_eq!(policy.max_delay, Duration::from_secs(60));
        assert_eq!(policy.multiplier, 2.0);
        assert!(policy.max_attempts.is_none());
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = ReconnectPolicy::default();

        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(16));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(32));

        // 64s would exceed the cap
        assert_eq!(policy.delay_for_attempt(6), Duration::from_secs(60));
        assert_eq!(policy.delay_for_attempt(20), Duration::from_secs(60));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = ReconnectPolicy::new()
            .with_initial_delay(Duration::from_millis(1000))
            .with_jitter(0.5);

        for _ in 0..50 {
            let delay = policy.delay_with_jitter(1);
            assert!(delay >= Duration::from_millis(500));
            assert!(delay <= Duration::from_millis(1500));
        }
    }

    #[test]
    fn test_should_reconnect() {
        let unlimited = ReconnectPolicy::default();
        assert!(unlimited.should_reconnect(0));
        assert!(unlimited.should_reconnect(100));

        let limited = ReconnectPolicy::default().with_max_attempts(3);
        assert!(limited.should_reconnect(0));
        assert!(limited.should_reconnect(2));
        assert!(!limited.should_reconnect(3));
        assert!(!limited.should_reconnect(10));
    }
}
