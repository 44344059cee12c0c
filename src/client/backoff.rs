//! Reconnection backoff
//!
//! Exponential delay starting at the configured minimum, doubled per
//! attempt, randomised by the jitter factor and capped at the maximum.

use std::time::Duration;

use rand::Rng;

use crate::config::SocketOptions;

const FACTOR: u64 = 2;

/// Reconnection delay generator
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    jitter: f64,
    attempts: u32,
}

impl Backoff {
    /// Create a backoff with the given bounds and jitter factor
    pub fn new(min: Duration, max: Duration, jitter: f64) -> Self {
        Self {
            min,
            max,
            jitter: jitter.clamp(0.0, 1.0),
            attempts: 0,
        }
    }

    /// Backoff configured from connection options
    pub fn from_options(options: &SocketOptions) -> Self {
        Self::new(
            options.reconnection_delay,
            options.reconnection_delay_max,
            options.randomization_factor,
        )
    }

    /// Attempts made since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay before the next attempt; advances the attempt counter
    pub fn next_delay(&mut self) -> Duration {
        let sample: f64 = rand::rng().random();
        let delay = self.delay_for(self.attempts, sample);
        self.attempts = self.attempts.saturating_add(1);
        delay
    }

    /// Forget previous attempts after a successful connection
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Delay for a 0-based attempt given a random sample in `[0, 1)`
    fn delay_for(&self, attempt: u32, sample: f64) -> Duration {
        let base = self.min.as_millis().min(u64::MAX as u128) as u64;
        let exp = attempt.min(32);
        let mut ms = base.saturating_mul(FACTOR.saturating_pow(exp)) as f64;

        if self.jitter > 0.0 {
            let deviation = (sample * self.jitter * ms).floor();
            // The tenths digit of the sample picks the direction
            if ((sample * 10.0).floor() as u64) & 1 == 0 {
                ms -= deviation;
            } else {
                ms += deviation;
            }
        }

        let max = self.max.as_millis().min(u64::MAX as u128) as f64;
        Duration::from_millis(ms.min(max).max(0.0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff(jitter: f64) -> Backoff {
        Backoff::new(Duration::from_millis(1000), Duration::from_millis(5000), jitter)
    }

    #[test]
    fn test_exponential_without_jitter() {
        let b = backoff(0.0);
        assert_eq!(b.delay_for(0, 0.3), Duration::from_millis(1000));
        assert_eq!(b.delay_for(1, 0.3), Duration::from_millis(2000));
        assert_eq!(b.delay_for(2, 0.3), Duration::from_millis(4000));
        assert_eq!(b.delay_for(3, 0.3), Duration::from_millis(5000));
        assert_eq!(b.delay_for(100, 0.3), Duration::from_millis(5000));
    }

    #[test]
    fn test_jitter_direction() {
        let b = backoff(0.5);
        // tenths digit 2 (even) subtracts, 3 (odd) adds
        assert_eq!(b.delay_for(0, 0.25), Duration::from_millis(875));
        assert_eq!(b.delay_for(0, 0.375), Duration::from_millis(1187));
    }

    #[test]
    fn test_delay_stays_within_bounds() {
        let mut b = backoff(0.5);
        for _ in 0..50 {
            let delay = b.next_delay();
            assert!(delay >= Duration::from_millis(500));
            assert!(delay <= Duration::from_millis(5000));
        }
        assert_eq!(b.attempts(), 50);
    }

    #[test]
    fn test_reset() {
        let mut b = backoff(0.0);
        b.next_delay();
        b.next_delay();
        assert_eq!(b.attempts(), 2);

        b.reset();
        assert_eq!(b.attempts(), 0);
        assert_eq!(b.next_delay(), Duration::from_millis(1000));
    }

    #[test]
    fn test_from_options() {
        let options = SocketOptions::parse("http://localhost").unwrap();
        let mut b = Backoff::from_options(&options);
        let first = b.next_delay();
        assert!(first >= Duration::from_millis(500) && first <= Duration::from_millis(1500));
    }
}
