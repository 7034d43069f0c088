//! Reconnect backoff.
//!
//! `delay = min(base * 1.5^attempts, 30s)`. No jitter: the sequence is
//! strictly increasing until it reaches the cap.

use std::time::Duration;

/// Upper bound on any reconnect delay.
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Growth factor per attempt.
pub const BACKOFF_MULTIPLIER: f64 = 1.5;

/// Delay before reconnect attempt number `attempts` (zero-based).
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap
)]
pub fn reconnect_delay(base: Duration, attempts: u32) -> Duration {
    let cap_ms = MAX_RECONNECT_DELAY.as_millis() as f64;
    let base_ms = base.as_millis() as f64;
    let delay_ms = base_ms * BACKOFF_MULTIPLIER.powi(attempts.min(64) as i32);
    Duration::from_millis(delay_ms.min(cap_ms).round() as u64)
}

/// Attempt accounting for one connection lifecycle.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    max_attempts: u32,
    attempts: u32,
}

impl Backoff {
    /// New tracker with zero attempts.
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_attempts,
            attempts: 0,
        }
    }

    /// Attempts scheduled so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Forget previous attempts (after a successful handshake).
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Delay for the next attempt, or `None` once `max_attempts` is reached.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.max_attempts {
            return None;
        }
        let delay = reconnect_delay(self.base, self.attempts);
        self.attempts += 1;
        Some(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_delay_is_base() {
        assert_eq!(
            reconnect_delay(Duration::from_millis(1000), 0),
            Duration::from_millis(1000)
        );
    }

    #[test]
    fn grows_by_one_and_a_half() {
        let base = Duration::from_millis(1000);
        assert_eq!(reconnect_delay(base, 1), Duration::from_millis(1500));
        assert_eq!(reconnect_delay(base, 2), Duration::from_millis(2250));
        assert_eq!(reconnect_delay(base, 3), Duration::from_millis(3375));
    }

    #[test]
    fn capped_at_thirty_seconds() {
        let base = Duration::from_millis(1000);
        assert_eq!(reconnect_delay(base, 9), MAX_RECONNECT_DELAY);
        assert_eq!(reconnect_delay(base, 1000), MAX_RECONNECT_DELAY);
    }

    #[test]
    fn sequence_strictly_increases_until_cap() {
        let mut backoff = Backoff::new(Duration::from_millis(500), 20);
        let mut prev = Duration::ZERO;
        while let Some(delay) = backoff.next_delay() {
            if prev == MAX_RECONNECT_DELAY {
                assert_eq!(delay, MAX_RECONNECT_DELAY);
            } else {
                assert!(delay > prev, "{delay:?} should exceed {prev:?}");
            }
            prev = delay;
        }
        assert_eq!(prev, MAX_RECONNECT_DELAY);
    }

    #[test]
    fn exhausts_after_max_attempts() {
        let mut backoff = Backoff::new(Duration::from_millis(100), 3);
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert_eq!(backoff.attempts(), 3);
        assert!(backoff.next_delay().is_none());
    }

    #[test]
    fn reset_restarts_sequence() {
        let mut backoff = Backoff::new(Duration::from_millis(100), 3);
        let _ = backoff.next_delay();
        let _ = backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn zero_max_attempts_never_retries() {
        let mut backoff = Backoff::new(Duration::from_millis(100), 0);
        assert!(backoff.next_delay().is_none());
    }
}
