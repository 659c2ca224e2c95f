//! Automatic reconnect policies.
//!
//! The hub client owns the reconnect loop; these types only describe which
//! delays it should wait between attempts.

use std::{fmt, sync::Arc, time::Duration};

use crate::TransportError;

/// Delays used when automatic reconnect is enabled without an explicit policy.
pub const DEFAULT_RETRY_DELAYS: [Duration; 4] = [
    Duration::ZERO,
    Duration::from_secs(2),
    Duration::from_secs(10),
    Duration::from_secs(30),
];

/// State of the reconnect loop handed to a [`RetryPolicy`]
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Number of attempts made so far in this reconnect cycle
    pub previous_retry_count: u32,
    /// Time spent reconnecting so far
    pub elapsed: Duration,
    /// Error that caused the reconnect cycle to start
    pub retry_reason: Option<TransportError>,
}

/// Caller supplied reconnect schedule.
///
/// Returning `None` stops reconnecting and closes the connection.
pub trait RetryPolicy: Send + Sync + fmt::Debug {
    fn next_retry_delay(&self, context: &RetryContext) -> Option<Duration>;
}

/// Fixed delay schedule, one entry per attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelaySequence(Vec<Duration>);

impl DelaySequence {
    pub fn new(delays: impl Into<Vec<Duration>>) -> Self {
        Self(delays.into())
    }

    pub fn delays(&self) -> &[Duration] {
        &self.0
    }
}

impl RetryPolicy for DelaySequence {
    fn next_retry_delay(&self, context: &RetryContext) -> Option<Duration> {
        self.0.get(context.previous_retry_count as usize).copied()
    }
}

/// Reconnect behaviour selected for a connection.
///
/// Absence of a policy (`Option::None` at the use site) disables automatic
/// reconnect entirely.
#[derive(Debug, Clone)]
pub enum ReconnectPolicy {
    /// Caller supplied policy object
    Custom(Arc<dyn RetryPolicy>),
    /// Fixed delay sequence
    Delays(Vec<Duration>),
    /// The client's default backoff ([`DEFAULT_RETRY_DELAYS`])
    Default,
}

impl ReconnectPolicy {
    pub fn next_retry_delay(&self, context: &RetryContext) -> Option<Duration> {
        match self {
            ReconnectPolicy::Custom(policy) => policy.next_retry_delay(context),
            ReconnectPolicy::Delays(delays) => {
                delays.get(context.previous_retry_count as usize).copied()
            }
            ReconnectPolicy::Default => DEFAULT_RETRY_DELAYS
                .get(context.previous_retry_count as usize)
                .copied(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(n: u32) -> RetryContext {
        RetryContext {
            previous_retry_count: n,
            elapsed: Duration::ZERO,
            retry_reason: None,
        }
    }

    #[derive(Debug)]
    struct Forever(Duration);

    impl RetryPolicy for Forever {
        fn next_retry_delay(&self, _context: &RetryContext) -> Option<Duration> {
            Some(self.0)
        }
    }

    #[test]
    fn default_policy_gives_up_after_four_attempts() {
        let policy = ReconnectPolicy::Default;
        assert_eq!(policy.next_retry_delay(&attempt(0)), Some(Duration::ZERO));
        assert_eq!(
            policy.next_retry_delay(&attempt(3)),
            Some(Duration::from_secs(30))
        );
        assert_eq!(policy.next_retry_delay(&attempt(4)), None);
    }

    #[test]
    fn delay_policy_follows_sequence() {
        let policy = ReconnectPolicy::Delays(vec![Duration::from_millis(100)]);
        assert_eq!(
            policy.next_retry_delay(&attempt(0)),
            Some(Duration::from_millis(100))
        );
        assert_eq!(policy.next_retry_delay(&attempt(1)), None);
    }

    #[test]
    fn custom_policy_is_consulted() {
        let policy = ReconnectPolicy::Custom(Arc::new(Forever(Duration::from_secs(1))));
        assert_eq!(
            policy.next_retry_delay(&attempt(99)),
            Some(Duration::from_secs(1))
        );
    }

    #[test]
    fn delay_sequence_as_policy() {
        let seq = DelaySequence::new([Duration::from_secs(1), Duration::from_secs(5)]);
        assert_eq!(seq.next_retry_delay(&attempt(1)), Some(Duration::from_secs(5)));
        assert_eq!(seq.next_retry_delay(&attempt(2)), None);
    }
}
