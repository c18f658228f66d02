//! Fixed-delay, bounded reconnect policy.

use std::time::Duration;

/// What to do after a connection loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Schedule attempt number `attempt` after `delay`.
    Retry { attempt: u32, delay: Duration },
    /// The attempt budget is spent.
    Exhausted { attempts: u32 },
}

/// Attempt counter with a fixed delay and a maximum.
///
/// The counter only goes back to zero through [`ReconnectPolicy::reset`],
/// which the session calls on a successful open.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    delay: Duration,
    max_attempts: u32,
    attempts: u32,
}

impl ReconnectPolicy {
    #[must_use]
    pub const fn new(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts,
            attempts: 0,
        }
    }

    /// Record a connection loss and decide whether to retry.
    pub const fn next(&mut self) -> ReconnectDecision {
        if self.attempts >= self.max_attempts {
            return ReconnectDecision::Exhausted {
                attempts: self.attempts,
            };
        }
        self.attempts += 1;
        ReconnectDecision::Retry {
            attempt: self.attempts,
            delay: self.delay,
        }
    }

    pub const fn reset(&mut self) {
        self.attempts = 0;
    }

    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }
}
