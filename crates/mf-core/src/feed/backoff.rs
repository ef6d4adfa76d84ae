//! Retry delay policies for the reconnect loop.
//!
//! The loop asks its policy how long to wait after each consecutive failure
//! (a refused connect or a lost stream). Returning `None` stops the loop.
//! Policies are plain values, so tests can use zero delays and a small
//! attempt cap instead of sleeping through real backoff.

use std::time::Duration;

/// Decides the delay before the next connect attempt.
pub trait BackoffPolicy: Send {
    /// Delay after `failures` consecutive failures (`failures >= 1`), or
    /// `None` to give up.
    fn next_delay(&mut self, failures: u32) -> Option<Duration>;

    /// Called when a connection reaches the streaming state.
    fn reset(&mut self) {}
}

/// Same delay every time. `max_attempts: None` retries forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedBackoff {
    pub delay: Duration,
    pub max_attempts: Option<u32>,
}

impl FixedBackoff {
    pub fn new(delay: Duration) -> Self {
        Self { delay, max_attempts: None }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

impl Default for FixedBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

impl BackoffPolicy for FixedBackoff {
    fn next_delay(&mut self, failures: u32) -> Option<Duration> {
        match self.max_attempts {
            Some(max) if failures >= max => None,
            _ => Some(self.delay),
        }
    }
}

/// Doubling delay, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    pub initial: Duration,
    pub max: Duration,
    pub max_attempts: Option<u32>,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self { initial: Duration::from_millis(100), max: Duration::from_secs(30), max_attempts: None }
    }
}

impl BackoffPolicy for ExponentialBackoff {
    fn next_delay(&mut self, failures: u32) -> Option<Duration> {
        if self.max_attempts.is_some_and(|max| failures >= max) {
            return None;
        }
        let shift = failures.saturating_sub(1).min(16);
        Some(self.initial.saturating_mul(1 << shift).min(self.max))
    }
}

impl<P: BackoffPolicy + ?Sized> BackoffPolicy for Box<P> {
    fn next_delay(&mut self, failures: u32) -> Option<Duration> {
        (**self).next_delay(failures)
    }

    fn reset(&mut self) {
        (**self).reset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_is_unbounded_by_default() {
        let mut p = FixedBackoff::new(Duration::from_secs(2));
        assert_eq!(p.next_delay(1), Some(Duration::from_secs(2)));
        assert_eq!(p.next_delay(10_000), Some(Duration::from_secs(2)));
    }

    #[test]
    fn fixed_gives_up_at_cap() {
        let mut p = FixedBackoff::new(Duration::ZERO).with_max_attempts(3);
        assert!(p.next_delay(2).is_some());
        assert!(p.next_delay(3).is_none());
    }

    #[test]
    fn exponential_doubles_then_caps() {
        let mut p = ExponentialBackoff::default();
        assert_eq!(p.next_delay(1), Some(Duration::from_millis(100)));
        assert_eq!(p.next_delay(2), Some(Duration::from_millis(200)));
        assert_eq!(p.next_delay(4), Some(Duration::from_millis(800)));
        assert_eq!(p.next_delay(40), Some(Duration::from_secs(30)));
    }

    #[test]
    fn boxed_policy_delegates() {
        let mut p: Box<dyn BackoffPolicy> = Box::new(FixedBackoff::new(Duration::ZERO).with_max_attempts(1));
        assert!(p.next_delay(1).is_none());
    }
}
