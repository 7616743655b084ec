//! Retry utilities for async operations
//!
//! Provides configurable retry policies with exponential backoff and jitter
//! for handling transient failures in async operations. A policy bounds both
//! the number of attempts and the total time spent sleeping between them.

use rand::Rng;
use std::time::Duration;

/// Configuration for retrying failed operations
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first)
    pub max_attempts: usize,

    /// Delay before the first retry
    pub initial_interval: Duration,

    /// Multiplier for the interval after each retry
    pub backoff_factor: f64,

    /// Maximum interval between retries
    pub max_interval: Duration,

    /// Upper bound on the sum of all backoff sleeps
    pub max_total_wait: Duration,

    /// Whether to add random jitter to intervals
    pub jitter: bool,
}

impl RetryPolicy {
    /// Create a new retry policy with the given max attempts
    ///
    /// # Example
    ///
    /// ```rust
    /// use tooling::async_utils::retry::RetryPolicy;
    ///
    /// let policy = RetryPolicy::new(3);
    /// assert_eq!(policy.max_attempts, 3);
    /// ```
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_interval: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_interval: Duration::from_secs(5),
            max_total_wait: Duration::from_secs(15),
            jitter: true,
        }
    }

    /// Set the initial interval between retries
    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    /// Set the maximum interval between retries
    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Set the total backoff budget
    pub fn with_max_total_wait(mut self, budget: Duration) -> Self {
        self.max_total_wait = budget;
        self
    }

    /// Enable or disable jitter
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Calculate the delay after the given failed attempt (0-indexed)
    ///
    /// Uses exponential backoff: initial_interval * (backoff_factor ^ attempt)
    /// capped at max_interval. Jitter scales the result by a random factor
    /// in `[0.5, 1.0]` so it never exceeds the cap.
    pub fn calculate_delay(&self, attempt: usize) -> Duration {
        let base = self.initial_interval.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        let capped = base.min(self.max_interval.as_secs_f64()).max(0.0);

        let delay = if self.jitter {
            capped * rand::thread_rng().gen_range(0.5..=1.0)
        } else {
            capped
        };

        Duration::from_secs_f64(delay)
    }

    /// Check if another attempt is allowed after `attempts` have been made
    pub fn should_retry(&self, attempts: usize) -> bool {
        attempts < self.max_attempts
    }

    /// Delay before the next attempt, or `None` if the attempt count or the
    /// wait budget is used up
    ///
    /// `waited` is the total backoff already slept. `deadline` is the time left
    /// in the caller's overall budget, if any; the delay never eats into it
    /// completely.
    pub fn next_delay(
        &self,
        attempts: usize,
        waited: Duration,
        deadline: Option<Duration>,
    ) -> Option<Duration> {
        if !self.should_retry(attempts) {
            return None;
        }

        let delay = self.calculate_delay(attempts.saturating_sub(1));
        if waited + delay > self.max_total_wait {
            return None;
        }

        match deadline {
            Some(remaining) if delay >= remaining => None,
            _ => Some(delay),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Parse a `Retry-After` header value given in seconds
///
/// HTTP dates are not accepted; they are never produced by this workspace.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}
