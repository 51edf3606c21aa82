//! Idle backoff for the poll loops.

use std::time::Duration;

use crate::config::BackoffConfig;

/// Bounded exponential wait between empty polls.
///
/// The first empty poll waits `initial_interval`; each consecutive empty poll multiplies the
/// wait by `multiplier`, never exceeding `max_interval`. A received message resets it.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    config: BackoffConfig,
    current: Option<Duration>,
}

impl BackoffPolicy {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            current: None,
        }
    }

    /// Wait to apply after another empty poll
    pub fn next_delay(&mut self) -> Duration {
        let next = match self.current {
            None => self.config.initial_interval,
            Some(current) => {
                let grown = current.as_nanos() as f64 * self.config.multiplier;
                if grown >= self.config.max_interval.as_nanos() as f64 {
                    self.config.max_interval
                } else {
                    Duration::from_nanos(grown as u64)
                }
            }
        };
        let next = next
            .min(self.config.max_interval)
            .max(self.config.initial_interval);
        self.current = Some(next);
        next
    }

    pub fn reset(&mut self) {
        self.current = None;
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_default_sequence() {
        let mut backoff = BackoffPolicy::default();
        let delays: Vec<u128> = (0..6).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000]);
    }

    #[test]
    fn test_reset_starts_over() {
        let mut backoff = BackoffPolicy::default();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_fixed_interval() {
        let mut backoff = BackoffPolicy::new(BackoffConfig::fixed(Duration::from_millis(250)));
        for _ in 0..5 {
            assert_eq!(backoff.next_delay(), Duration::from_millis(250));
        }
    }

    proptest! {
        #[test]
        fn delays_stay_within_bounds(
            initial_ms in 1u64..5_000,
            extra_ms in 0u64..60_000,
            multiplier in 1.0f64..10.0,
            polls in 1usize..64,
        ) {
            let config = BackoffConfig {
                initial_interval: Duration::from_millis(initial_ms),
                max_interval: Duration::from_millis(initial_ms + extra_ms),
                multiplier,
            };
            let mut backoff = BackoffPolicy::new(config.clone());

            let mut previous = Duration::ZERO;
            for _ in 0..polls {
                let delay = backoff.next_delay();
                prop_assert!(delay >= config.initial_interval);
                prop_assert!(delay <= config.max_interval);
                prop_assert!(delay >= previous);
                previous = delay;
            }
        }
    }
}
