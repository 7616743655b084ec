//! Token bucket arithmetic
//!
//! Buckets here are plain values: a capacity, a refill rate, the current
//! token count and the wall-clock millisecond of the last refill. Refill is
//! lazy, computed from elapsed time at check time, so the complete state of a
//! bucket can be stored anywhere as `(tokens, last_refill_ms)` and rebuilt
//! later without drift.
//!
//! # Example
//!
//! ```rust
//! use tooling::rate_limit::{BucketConfig, TokenBucket};
//!
//! // 100 requests per hour, burst of 100
//! let config = BucketConfig::per_hour(100);
//! let mut bucket = TokenBucket::full(&config, 0);
//!
//! assert!(bucket.try_consume(&config, 1.0, 0).is_ok());
//! assert_eq!(bucket.tokens.floor() as u64, 99);
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Capacity and refill rate of one bucket
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketConfig {
    /// Maximum number of tokens the bucket can hold
    pub capacity: f64,

    /// Tokens added per second
    pub refill_per_sec: f64,
}

impl BucketConfig {
    /// Create a bucket config from an explicit capacity and refill rate
    pub fn new(capacity: f64, refill_per_sec: f64) -> Self {
        Self {
            capacity,
            refill_per_sec,
        }
    }

    /// `limit` requests per hour with a burst equal to the hourly limit
    pub fn per_hour(limit: u64) -> Self {
        Self::new(limit as f64, limit as f64 / 3600.0)
    }

    /// Time needed to accumulate `needed` tokens from empty
    pub fn time_to_refill(&self, needed: f64) -> Duration {
        if needed <= 0.0 {
            return Duration::ZERO;
        }
        if self.refill_per_sec <= 0.0 {
            return Duration::MAX;
        }
        Duration::from_secs_f64(needed / self.refill_per_sec)
    }
}

/// Persistable bucket state
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenBucket {
    /// Current tokens, always within `[0, capacity]`
    pub tokens: f64,

    /// Unix time in milliseconds of the last refill
    pub last_refill_ms: u64,
}

/// Outcome of a failed consume
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Exhausted {
    /// Tokens left in the bucket after refill
    pub available: f64,

    /// Wait until enough tokens have accumulated
    pub retry_after: Duration,
}

impl TokenBucket {
    /// A bucket at full capacity
    pub fn full(config: &BucketConfig, now_ms: u64) -> Self {
        Self {
            tokens: config.capacity,
            last_refill_ms: now_ms,
        }
    }

    /// Add tokens for the time elapsed since the last refill
    ///
    /// A clock that moves backwards adds nothing but still moves
    /// `last_refill_ms`, so a skewed writer cannot mint tokens later.
    pub fn refill(&mut self, config: &BucketConfig, now_ms: u64) {
        let elapsed_ms = now_ms.saturating_sub(self.last_refill_ms);
        let added = (elapsed_ms as f64 / 1000.0) * config.refill_per_sec;
        self.tokens = (self.tokens + added).clamp(0.0, config.capacity);
        self.last_refill_ms = now_ms;
    }

    /// Whether `cost` tokens are available after refill, without consuming
    pub fn check(&mut self, config: &BucketConfig, cost: f64, now_ms: u64) -> Result<(), Exhausted> {
        self.refill(config, now_ms);
        if self.tokens >= cost {
            Ok(())
        } else {
            Err(Exhausted {
                available: self.tokens,
                retry_after: config.time_to_refill(cost - self.tokens),
            })
        }
    }

    /// Refill, then take `cost` tokens if they are all available
    pub fn try_consume(
        &mut self,
        config: &BucketConfig,
        cost: f64,
        now_ms: u64,
    ) -> Result<(), Exhausted> {
        self.check(config, cost, now_ms)?;
        self.tokens = (self.tokens - cost).max(0.0);
        Ok(())
    }

    /// Whole tokens available right now
    pub fn available(&self) -> u64 {
        self.tokens.floor() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_bucket_allows_up_to_capacity() {
        let config = BucketConfig::new(5.0, 1.0);
        let mut bucket = TokenBucket::full(&config, 0);

        for _ in 0..5 {
            assert!(bucket.try_consume(&config, 1.0, 0).is_ok());
        }

        let denied = bucket.try_consume(&config, 1.0, 0).unwrap_err();
        assert_eq!(denied.retry_after, Duration::from_secs(1));
    }

    #[test]
    fn test_bucket_refills_lazily() {
        let config = BucketConfig::new(2.0, 10.0);
        let mut bucket = TokenBucket::full(&config, 1_000);

        bucket.try_consume(&config, 2.0, 1_000).unwrap();
        assert!(bucket.try_consume(&config, 1.0, 1_050).is_err());

        // 100ms at 10/s is one token
        assert!(bucket.try_consume(&config, 1.0, 1_150).is_ok());
    }

    #[test]
    fn test_refill_caps_at_capacity() {
        let config = BucketConfig::new(3.0, 1.0);
        let mut bucket = TokenBucket {
            tokens: 0.0,
            last_refill_ms: 0,
        };

        bucket.refill(&config, 3_600_000);
        assert_eq!(bucket.tokens, 3.0);
    }

    #[test]
    fn test_clock_going_backwards_adds_nothing() {
        let config = BucketConfig::new(10.0, 1.0);
        let mut bucket = TokenBucket {
            tokens: 1.0,
            last_refill_ms: 10_000,
        };

        bucket.refill(&config, 5_000);
        assert_eq!(bucket.tokens, 1.0);
        assert_eq!(bucket.last_refill_ms, 5_000);
    }

    #[test]
    fn test_per_hour_retry_after() {
        let config = BucketConfig::per_hour(100);
        let mut bucket = TokenBucket {
            tokens: 0.0,
            last_refill_ms: 0,
        };

        let denied = bucket.try_consume(&config, 1.0, 0).unwrap_err();
        assert_eq!(denied.retry_after.as_secs(), 36);
    }

    #[test]
    fn test_zero_rate_never_refills() {
        let config = BucketConfig::new(1.0, 0.0);
        let mut bucket = TokenBucket::full(&config, 0);
        bucket.try_consume(&config, 1.0, 0).unwrap();

        let denied = bucket.try_consume(&config, 1.0, 1_000_000).unwrap_err();
        assert_eq!(denied.retry_after, Duration::MAX);
    }

    proptest! {
        #[test]
        fn prop_tokens_stay_within_bounds(
            capacity in 1u32..500,
            rate in 0.0f64..50.0,
            steps in proptest::collection::vec((0u64..5_000, 0.0f64..5.0), 1..200),
        ) {
            let config = BucketConfig::new(capacity as f64, rate);
            let mut bucket = TokenBucket::full(&config, 0);
            let mut now = 0u64;

            for (advance, cost) in steps {
                now += advance;
                let _ = bucket.try_consume(&config, cost, now);
                prop_assert!(bucket.tokens >= 0.0);
                prop_assert!(bucket.tokens <= config.capacity);
            }
        }
    }
}
