/*
[INPUT]:  Close events and the configured ReconnectPolicy
[OUTPUT]: Retry decisions (next delay or give up) and observable connection state
[POS]:    WebSocket layer - reconnection state machine
[UPDATE]: When changing backoff growth, attempt caps, or connection states
*/

use std::time::Duration;

use crate::config::ReconnectPolicy;

/// Observable lifecycle of a client's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never connected in this session
    Idle,
    /// Handshake in flight
    Connecting,
    /// Connected and resubscribed
    Open,
    /// Waiting `delay` before retry number `attempt`
    Reconnecting { attempt: u32, delay: Duration },
    /// Automatic retries exhausted
    Closed,
    /// Closed by an explicit `disconnect()`
    Disconnected,
}

impl ConnectionState {
    /// States from which an explicit `connect()` starts a fresh retry budget.
    pub fn is_at_rest(&self) -> bool {
        matches!(
            self,
            ConnectionState::Idle | ConnectionState::Closed | ConnectionState::Disconnected
        )
    }
}

/// What to do after a close event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { attempt: u32, delay: Duration },
    GiveUp { attempts: u32 },
}

/// Counts consecutive close events against a [`ReconnectPolicy`].
#[derive(Debug, Clone)]
pub struct ReconnectTracker {
    policy: ReconnectPolicy,
    attempt: u32,
}

impl ReconnectTracker {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Called on every successful open and on explicit `connect()` from rest.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Register a close event and decide whether another attempt is allowed.
    pub fn on_close(&mut self) -> RetryDecision {
        self.attempt = self.attempt.saturating_add(1);
        if self.attempt > self.policy.max_attempts {
            return RetryDecision::GiveUp {
                attempts: self.policy.max_attempts,
            };
        }
        RetryDecision::Retry {
            attempt: self.attempt,
            delay: backoff_delay(&self.policy, self.attempt),
        }
    }
}

/// `base_delay * 2^(attempt-1)`; attempt numbering starts at 1.
pub fn backoff_delay(policy: &ReconnectPolicy, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(31);
    policy.base_delay().saturating_mul(1u32 << exp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn policy(base_delay_ms: u64, max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay_ms,
            max_attempts,
        }
    }

    #[rstest]
    #[case(1, 1_000)]
    #[case(2, 2_000)]
    #[case(3, 4_000)]
    #[case(4, 8_000)]
    #[case(5, 16_000)]
    fn backoff_doubles_per_attempt(#[case] attempt: u32, #[case] expected_ms: u64) {
        assert_eq!(
            backoff_delay(&policy(1_000, 5), attempt),
            Duration::from_millis(expected_ms)
        );
    }

    #[test]
    fn backoff_does_not_overflow_on_huge_attempts() {
        let delay = backoff_delay(&policy(1_000, u32::MAX), u32::MAX);
        assert!(delay >= Duration::from_secs(1));
    }

    #[test]
    fn tracker_delays_strictly_increase_until_cap() {
        let mut tracker = ReconnectTracker::new(policy(100, 5));
        let mut previous = Duration::ZERO;

        for expected_attempt in 1..=5 {
            match tracker.on_close() {
                RetryDecision::Retry { attempt, delay } => {
                    assert_eq!(attempt, expected_attempt);
                    assert!(delay > previous);
                    previous = delay;
                }
                RetryDecision::GiveUp { .. } => panic!("gave up too early at {expected_attempt}"),
            }
        }

        assert_eq!(tracker.on_close(), RetryDecision::GiveUp { attempts: 5 });
        assert_eq!(tracker.on_close(), RetryDecision::GiveUp { attempts: 5 });
    }

    #[test]
    fn tracker_reset_restarts_budget() {
        let mut tracker = ReconnectTracker::new(policy(100, 2));
        tracker.on_close();
        tracker.on_close();
        assert!(matches!(tracker.on_close(), RetryDecision::GiveUp { .. }));

        tracker.reset();
        assert_eq!(tracker.attempt(), 0);
        assert_eq!(
            tracker.on_close(),
            RetryDecision::Retry {
                attempt: 1,
                delay: Duration::from_millis(100)
            }
        );
    }

    #[test]
    fn zero_attempt_policy_never_retries() {
        let mut tracker = ReconnectTracker::new(policy(100, 0));
        assert_eq!(tracker.on_close(), RetryDecision::GiveUp { attempts: 0 });
    }

    #[test]
    fn rest_states() {
        assert!(ConnectionState::Idle.is_at_rest());
        assert!(ConnectionState::Closed.is_at_rest());
        assert!(ConnectionState::Disconnected.is_at_rest());
        assert!(!ConnectionState::Open.is_at_rest());
        assert!(
            !ConnectionState::Reconnecting {
                attempt: 1,
                delay: Duration::from_secs(1)
            }
            .is_at_rest()
        );
    }
}
