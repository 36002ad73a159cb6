//! Delivery retry as an explicit state machine
//!
//! [`DeliverySequence`] only records attempts and computes when the next one
//! is due; the notifier owns the waiting, so cancellation and paused-clock
//! tests need nothing special.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use super::sink::DeliveryError;

/// Backoff parameters
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Random spread as a fraction of the delay, 0.0 to disable
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Delay after the `failed`-th failed attempt: base * 2^(failed-1), capped
    pub fn delay_for(&self, failed: u32) -> Duration {
        let exponent = failed.saturating_sub(1).min(31);
        let delay = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);

        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let spread = self.jitter.min(1.0);
        let factor = rand::thread_rng().gen_range(1.0 - spread..=1.0 + spread);
        delay.mul_f64(factor).min(self.max_delay)
    }
}

/// One recorded attempt
#[derive(Debug, Clone)]
pub struct DeliveryAttempt {
    /// 1-based
    pub attempt: u32,
    pub succeeded: bool,
    pub error: Option<String>,
    /// When the following attempt is due, if there is one
    pub next_retry: Option<Instant>,
}

/// Where a sequence stands after an attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceState {
    /// Try again at this instant
    Retry { at: Instant },
    Delivered,
    /// Retryable failures until the attempt budget ran out
    Exhausted,
    /// Non-retryable failure
    Rejected,
}

/// Attempts for one alert
#[derive(Debug)]
pub struct DeliverySequence {
    policy: RetryPolicy,
    next_due: Option<Instant>,
    attempts: Vec<DeliveryAttempt>,
}

impl DeliverySequence {
    /// First attempt is due at `now`
    pub fn new(policy: RetryPolicy, now: Instant) -> Self {
        Self {
            policy,
            next_due: Some(now),
            attempts: Vec::new(),
        }
    }

    /// When the next attempt should run; `None` once terminal
    pub fn next_due(&self) -> Option<Instant> {
        self.next_due
    }

    pub fn attempts(&self) -> &[DeliveryAttempt] {
        &self.attempts
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempts.len() as u32
    }

    pub fn last_error(&self) -> Option<&str> {
        self.attempts.last().and_then(|a| a.error.as_deref())
    }

    /// Record the result of the attempt that was due
    pub fn record(&mut self, result: Result<(), DeliveryError>, now: Instant) -> SequenceState {
        let attempt = self.attempt_count() + 1;

        let (state, error) = match result {
            Ok(()) => (SequenceState::Delivered, None),
            Err(e) if !e.is_retryable() => (SequenceState::Rejected, Some(e.to_string())),
            Err(e) if attempt >= self.policy.max_attempts => {
                (SequenceState::Exhausted, Some(e.to_string()))
            }
            Err(e) => (
                SequenceState::Retry {
                    at: now + self.policy.delay_for(attempt),
                },
                Some(e.to_string()),
            ),
        };

        self.next_due = match state {
            SequenceState::Retry { at } => Some(at),
            _ => None,
        };
        self.attempts.push(DeliveryAttempt {
            attempt,
            succeeded: state == SequenceState::Delivered,
            error,
            next_retry: self.next_due,
        });

        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            jitter: 0.0,
        }
    }

    fn transient() -> Result<(), DeliveryError> {
        Err(DeliveryError::Network("connection reset".to_string()))
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let p = policy(10);
        assert_eq!(p.delay_for(1), Duration::from_secs(1));
        assert_eq!(p.delay_for(2), Duration::from_secs(2));
        assert_eq!(p.delay_for(3), Duration::from_secs(4));
        assert_eq!(p.delay_for(4), Duration::from_secs(8));
        assert_eq!(p.delay_for(5), Duration::from_secs(10));
        assert_eq!(p.delay_for(40), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let p = RetryPolicy {
            jitter: 0.2,
            ..policy(10)
        };
        for _ in 0..100 {
            let d = p.delay_for(2);
            assert!(d >= Duration::from_millis(1600) && d <= Duration::from_millis(2400));
        }
    }

    #[test]
    fn test_success_first_try() {
        let now = Instant::now();
        let mut seq = DeliverySequence::new(policy(3), now);
        assert_eq!(seq.next_due(), Some(now));
        assert_eq!(seq.record(Ok(()), now), SequenceState::Delivered);
        assert_eq!(seq.next_due(), None);
        assert_eq!(seq.attempt_count(), 1);
        assert!(seq.attempts()[0].succeeded);
    }

    #[test]
    fn test_exhausts_after_max_attempts() {
        let now = Instant::now();
        let mut seq = DeliverySequence::new(policy(3), now);

        assert_eq!(
            seq.record(transient(), now),
            SequenceState::Retry {
                at: now + Duration::from_secs(1)
            }
        );
        assert_eq!(
            seq.record(transient(), now),
            SequenceState::Retry {
                at: now + Duration::from_secs(2)
            }
        );
        assert_eq!(seq.record(transient(), now), SequenceState::Exhausted);
        assert_eq!(seq.attempt_count(), 3);
        assert_eq!(seq.next_due(), None);
        assert!(seq.last_error().unwrap().contains("connection reset"));
    }

    #[test]
    fn test_non_retryable_stops_immediately() {
        let now = Instant::now();
        let mut seq = DeliverySequence::new(policy(5), now);
        let state = seq.record(
            Err(DeliveryError::Status {
                code: 401,
                body: "bad key".to_string(),
            }),
            now,
        );
        assert_eq!(state, SequenceState::Rejected);
        assert_eq!(seq.attempt_count(), 1);
    }

    #[test]
    fn test_single_attempt_budget() {
        let now = Instant::now();
        let mut seq = DeliverySequence::new(policy(1), now);
        assert_eq!(seq.record(transient(), now), SequenceState::Exhausted);
    }
}
