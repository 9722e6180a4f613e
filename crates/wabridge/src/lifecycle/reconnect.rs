//! Reconnect delay policy.

use std::time::Duration;

use crate::config::{ReconnectConfig, ReconnectStrategy};

/// What ended the previous attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCause {
    /// The session reported a non-terminal closure.
    Closed,
    /// The attempt could not be started at all.
    ConnectError,
}

/// Decides how long to wait before the next connection attempt.
///
/// Neither strategy gives up; only a logged-out closure stops reconnection and
/// that decision is made by the controller, not here.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    strategy: ReconnectStrategy,
    delay: Duration,
    connect_error_delay: Duration,
    max_delay: Duration,
    consecutive_failures: u32,
}

impl ReconnectPolicy {
    pub fn new(config: &ReconnectConfig) -> Self {
        let delay = Duration::from_secs(config.delay_seconds);
        Self {
            strategy: config.strategy,
            delay,
            connect_error_delay: Duration::from_secs(config.connect_error_delay_seconds),
            max_delay: Duration::from_secs(config.max_delay_seconds).max(delay),
            consecutive_failures: 0,
        }
    }

    /// Delay before the next attempt. Advances the backoff.
    pub fn next_delay(&mut self, cause: RetryCause) -> Duration {
        let base = match cause {
            RetryCause::Closed => self.delay,
            RetryCause::ConnectError => self.connect_error_delay,
        };

        let delay = match self.strategy {
            ReconnectStrategy::Fixed => base,
            ReconnectStrategy::Exponential => {
                let factor = 2u32.saturating_pow(self.consecutive_failures.min(16));
                base.saturating_mul(factor).min(self.max_delay.max(base))
            }
        };

        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        delay
    }

    /// Forget past failures. Called once a connection opens.
    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(&ReconnectConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exponential(delay: u64, max: u64) -> ReconnectPolicy {
        ReconnectPolicy::new(&ReconnectConfig {
            strategy: ReconnectStrategy::Exponential,
            delay_seconds: delay,
            connect_error_delay_seconds: 5,
            max_delay_seconds: max,
        })
    }

    #[test]
    fn test_fixed_delays_never_grow() {
        let mut policy = ReconnectPolicy::default();
        for _ in 0..10 {
            assert_eq!(policy.next_delay(RetryCause::Closed), Duration::from_secs(3));
        }
        assert_eq!(
            policy.next_delay(RetryCause::ConnectError),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_exponential_doubles_up_to_cap() {
        let mut policy = exponential(3, 20);
        let delays: Vec<u64> = (0..6)
            .map(|_| policy.next_delay(RetryCause::Closed).as_secs())
            .collect();
        assert_eq!(delays, vec![3, 6, 12, 20, 20, 20]);
    }

    #[test]
    fn test_exponential_reset_after_open() {
        let mut policy = exponential(3, 60);
        policy.next_delay(RetryCause::Closed);
        policy.next_delay(RetryCause::Closed);
        policy.reset();
        assert_eq!(policy.next_delay(RetryCause::Closed), Duration::from_secs(3));
    }

    #[test]
    fn test_exponential_survives_many_failures() {
        let mut policy = exponential(3, 60);
        for _ in 0..1000 {
            assert!(policy.next_delay(RetryCause::ConnectError) <= Duration::from_secs(60));
        }
    }
}
