//! Exponential backoff for signaling reconnect attempts.
//!
//! Grounded on the teacher's `RetryConfig::backoff_duration` shape, fixed
//! to the signaling reconnect policy: base 1 s, cap 10 s, 5 attempts.

use std::time::Duration;

/// Signaling reconnect policy: exponential backoff with a fixed attempt
/// budget. On the final failed attempt the session is abandoned.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    base: Duration,
    cap: Duration,
    max_attempts: u32,
}

impl ReconnectPolicy {
    /// The spec-mandated signaling reconnect policy: 1 s base, 10 s cap,
    /// 5 attempts.
    #[must_use]
    pub fn signaling_default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(10),
            max_attempts: 5,
        }
    }

    /// Maximum number of reconnect attempts before the session is
    /// abandoned.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// The backoff delay before retry number `attempt` (0-indexed).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.base.as_millis() as f64;
        let scaled = base_ms * 2f64.powi(attempt as i32);
        let capped = scaled.min(self.cap.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Whether `attempt` (0-indexed) still has a retry available.
    #[must_use]
    pub fn has_attempt(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_up_to_the_cap() {
        let policy = ReconnectPolicy::signaling_default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for(4), Duration::from_secs(10));
        assert_eq!(policy.delay_for(10), Duration::from_secs(10));
    }

    #[test]
    fn exhausts_after_five_attempts() {
        let policy = ReconnectPolicy::signaling_default();
        assert!(policy.has_attempt(0));
        assert!(policy.has_attempt(4));
        assert!(!policy.has_attempt(5));
    }
}
