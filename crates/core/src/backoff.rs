//! Retry backoff policy.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::OutboxMessage;

/// Exponential backoff with a cap.
///
/// `delay_for_attempt(n) = min(base * 2^n, cap)`. Applied on every nack; the
/// cap bounds the delay, not the attempt count — discarding messages after N
/// attempts is an operator/monitoring concern, not enforced here.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub base: Duration,
    /// Maximum delay between retries.
    pub cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(30),
            cap: Duration::from_secs(60 * 60),
        }
    }
}

impl BackoffPolicy {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// Delay to wait after the given number of failed attempts.
    pub fn delay_for_attempt(&self, attempts: u32) -> Duration {
        let base_ms = self.base.as_millis() as f64;
        let cap_ms = self.cap.as_millis() as f64;

        let exp = 2_f64.powi(attempts.min(63) as i32);
        Duration::from_millis((base_ms * exp).min(cap_ms) as u64)
    }

    /// Record a failed delivery attempt on the message.
    ///
    /// Increments `attempts` by exactly one and pushes `next_attempt_at`
    /// forward by the delay for the new attempt count.
    pub fn nack(&self, msg: &mut OutboxMessage, now: DateTime<Utc>) {
        msg.attempts += 1;
        let delay = chrono::Duration::from_std(self.delay_for_attempt(msg.attempts))
            .unwrap_or(chrono::Duration::MAX);
        msg.next_attempt_at = (now + delay).max(msg.next_attempt_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Channel;
    use proptest::prelude::*;

    #[test]
    fn delay_doubles_per_attempt() {
        let policy = BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(10));

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(800));
    }

    #[test]
    fn delay_is_capped() {
        let policy = BackoffPolicy::new(Duration::from_secs(30), Duration::from_secs(3600));

        assert_eq!(policy.delay_for_attempt(20), Duration::from_secs(3600));
        // Large attempt counts must not overflow.
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_secs(3600));
    }

    #[test]
    fn nack_increments_attempts_and_defers() {
        let policy = BackoffPolicy::default();
        let now = Utc::now();
        let mut msg = OutboxMessage::new(Channel::Email, "a@b.test", "s", "b", now);

        policy.nack(&mut msg, now);

        assert_eq!(msg.attempts, 1);
        assert!(msg.next_attempt_at > now);
        assert!(!msg.is_due(now));
    }

    proptest! {
        #[test]
        fn attempts_equal_nack_count_and_due_time_never_regresses(nacks in 1usize..40) {
            let policy = BackoffPolicy::new(Duration::from_millis(10), Duration::from_secs(60));
            let now = Utc::now();
            let mut msg = OutboxMessage::new(Channel::Push, "token", "s", "b", now);

            let mut previous = msg.next_attempt_at;
            for _ in 0..nacks {
                policy.nack(&mut msg, now);
                prop_assert!(msg.next_attempt_at >= previous);
                previous = msg.next_attempt_at;
            }
            prop_assert_eq!(msg.attempts as usize, nacks);
        }

        #[test]
        fn delay_is_monotonic_in_attempts(a in 0u32..30, b in 0u32..30) {
            let policy = BackoffPolicy::default();
            if a <= b {
                prop_assert!(policy.delay_for_attempt(a) <= policy.delay_for_attempt(b));
            }
        }
    }
}
