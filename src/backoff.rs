//! # Fibonacci Backoff
//!
//! Progressive delays for the replication waiter and for transport-level retries
//! of throttled Graph requests. Grows more slowly than exponential backoff, so a
//! freshly created object that shows up after a few seconds is not kept waiting
//! for half a minute.
//!
//! Sequence for `new(1s, 10s)`: 1s, 1s, 2s, 3s, 5s, 8s, 10s (max).
//!
//! ```rust
//! use azuread_provider::backoff::FibonacciBackoff;
//! use std::time::Duration;
//!
//! let mut backoff = FibonacciBackoff::new(Duration::from_secs(1), Duration::from_secs(10));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(1));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(1));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(2));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(3));
//! ```

use std::time::Duration;

/// Fibonacci backoff calculator
///
/// Each delay is the sum of the previous two, capped at the maximum.
/// Calculations are performed in milliseconds.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    /// Minimum delay in milliseconds (for reset)
    min_ms: u64,
    /// Previous delay in milliseconds
    prev_ms: u64,
    /// Current delay in milliseconds
    current_ms: u64,
    /// Maximum delay in milliseconds
    max_ms: u64,
}

impl FibonacciBackoff {
    /// Create a new backoff with the given first and maximum delays
    ///
    /// A zero minimum produces a zero delay on every call, which is what tests
    /// driving the waiter want.
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        let min_ms = u64::try_from(min.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(max.as_millis())
            .unwrap_or(u64::MAX)
            .max(min_ms);
        Self {
            min_ms,
            prev_ms: 0,
            current_ms: min_ms,
            max_ms,
        }
    }

    /// Get the next delay in milliseconds and advance the sequence
    pub fn next_backoff_millis(&mut self) -> u64 {
        let result_ms = self.current_ms;

        let next_ms = self.prev_ms.saturating_add(self.current_ms);
        self.prev_ms = self.current_ms;
        self.current_ms = std::cmp::min(next_ms, self.max_ms);

        result_ms
    }

    /// Get the next delay as a `Duration` and advance the sequence
    #[must_use]
    pub fn next_backoff(&mut self) -> Duration {
        Duration::from_millis(self.next_backoff_millis())
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.prev_ms = 0;
        self.current_ms = self.min_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fibonacci_backoff_sequence() {
        let mut backoff = FibonacciBackoff::new(Duration::from_secs(1), Duration::from_secs(10));

        assert_eq!(backoff.next_backoff_millis(), 1_000);
        assert_eq!(backoff.next_backoff_millis(), 1_000);
        assert_eq!(backoff.next_backoff_millis(), 2_000);
        assert_eq!(backoff.next_backoff_millis(), 3_000);
        assert_eq!(backoff.next_backoff_millis(), 5_000);
        assert_eq!(backoff.next_backoff_millis(), 8_000);
        assert_eq!(backoff.next_backoff_millis(), 10_000);
        // 13s would be next, capped
        assert_eq!(backoff.next_backoff_millis(), 10_000);
    }

    #[test]
    fn test_fibonacci_backoff_reset() {
        let mut backoff = FibonacciBackoff::new(Duration::from_millis(500), Duration::from_secs(8));

        assert_eq!(backoff.next_backoff(), Duration::from_millis(500));
        assert_eq!(backoff.next_backoff(), Duration::from_millis(500));
        assert_eq!(backoff.next_backoff(), Duration::from_millis(1_000));

        backoff.reset();

        assert_eq!(backoff.next_backoff(), Duration::from_millis(500));
        assert_eq!(backoff.next_backoff(), Duration::from_millis(500));
    }

    #[test]
    fn test_zero_minimum_stays_zero() {
        let mut backoff = FibonacciBackoff::new(Duration::ZERO, Duration::from_secs(1));
        for _ in 0..5 {
            assert_eq!(backoff.next_backoff(), Duration::ZERO);
        }
    }

    #[test]
    fn test_max_below_min_is_raised_to_min() {
        let mut backoff = FibonacciBackoff::new(Duration::from_secs(2), Duration::from_secs(1));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(2));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(2));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(2));
    }
}
