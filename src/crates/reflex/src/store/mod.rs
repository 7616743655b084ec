//! Shared state backends for the cache and the rate limiter
//!
//! The reflex tier keeps two kinds of shared state: cached verdicts with an
//! expiry, and token buckets. Both sit behind traits so several service
//! instances can point at one backend while tests use the in-memory one.
//! Every mutating call is atomic on its own; the multi-bucket admission in
//! [`BucketStore::consume_all`] runs as a single critical section.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tooling::rate_limit::{BucketConfig, TokenBucket};

#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend unreachable (pool closed, I/O failure, timeout)
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Backend reachable but the operation failed
    #[error("Store operation failed: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StoreError::Unavailable(err.to_string()),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for crate::ReflexError {
    fn from(err: StoreError) -> Self {
        crate::ReflexError::StoreUnavailable(err.to_string())
    }
}

/// One bucket to charge during an admission check
#[derive(Debug, Clone, PartialEq)]
pub struct BucketRequest {
    pub key: String,
    pub config: BucketConfig,
    pub cost: f64,
}

/// Outcome of a multi-bucket admission check
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// Every bucket was charged; whole tokens left per request, in order
    Allowed { remaining: Vec<u64> },

    /// Nothing was charged. `index` points at the exhausted request with the
    /// longest wait.
    Denied { index: usize, retry_after: Duration },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed { .. })
    }
}

/// Key-value store with per-entry expiry
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Value under `key` unless it has expired by `now_ms`
    async fn get(&self, key: &str, now_ms: u64) -> StoreResult<Option<Vec<u8>>>;

    /// Insert or replace `key`
    async fn put(&self, key: &str, value: Vec<u8>, expires_at_ms: u64) -> StoreResult<()>;

    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Drop expired entries, returning how many were removed
    async fn purge_expired(&self, now_ms: u64) -> StoreResult<u64>;
}

/// Token bucket state with atomic multi-bucket check-and-consume
#[async_trait]
pub trait BucketStore: Send + Sync {
    /// Refill every bucket, then charge all of them or none
    async fn consume_all(&self, requests: &[BucketRequest], now_ms: u64) -> StoreResult<Admission>;

    /// Whole tokens in `key` after refill, without charging
    async fn peek(&self, key: &str, config: &BucketConfig, now_ms: u64) -> StoreResult<u64>;

    /// Drop buckets that are back at capacity by `now_ms`, returning how
    /// many were removed
    ///
    /// A full bucket admits exactly like one that was never created, so
    /// eviction never changes a decision.
    async fn purge_idle(&self, now_ms: u64) -> StoreResult<u64>;
}

/// Handles to the cache and bucket halves of one backend
#[derive(Clone)]
pub struct Stores {
    pub cache: Arc<dyn CacheStore>,
    pub buckets: Arc<dyn BucketStore>,
}

impl Stores {
    /// Both halves served by the same backend
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: CacheStore + BucketStore + 'static,
    {
        Self {
            cache: store.clone(),
            buckets: store,
        }
    }

    pub fn memory() -> Self {
        Self::shared(Arc::new(MemoryStore::new()))
    }
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}

/// Open a backend from a URL: `memory` or any `sqlite:` URL
pub async fn open(url: &str) -> StoreResult<Stores> {
    let url = url.trim();
    if url.is_empty() || url.eq_ignore_ascii_case("memory") {
        return Ok(Stores::memory());
    }
    if url.starts_with("sqlite:") {
        let store = SqliteStore::connect(url).await?;
        return Ok(Stores::shared(Arc::new(store)));
    }
    Err(StoreError::Backend(format!("unsupported store url: {}", url)))
}

/// Pick the longest wait among exhausted buckets
pub(crate) fn longest_wait(exhausted: &[(usize, Duration)]) -> Option<(usize, Duration)> {
    exhausted
        .iter()
        .copied()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
}

/// Millisecond at which `bucket` has refilled to capacity
///
/// Rounded up so a bucket is never reported full early. Buckets that never
/// refill saturate at `u64::MAX`.
pub(crate) fn full_at_ms(bucket: &TokenBucket, config: &BucketConfig) -> u64 {
    let wait = config.time_to_refill(config.capacity - bucket.tokens);
    let wait_ms = u64::try_from(wait.as_nanos().div_ceil(1_000_000)).unwrap_or(u64::MAX);
    bucket.last_refill_ms.saturating_add(wait_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_longest_wait_prefers_first_on_tie() {
        let waits = [
            (0, Duration::from_secs(5)),
            (1, Duration::from_secs(9)),
            (2, Duration::from_secs(9)),
        ];
        assert_eq!(longest_wait(&waits), Some((1, Duration::from_secs(9))));
        assert_eq!(longest_wait(&[]), None);
    }

    #[test]
    fn test_full_at_rounds_up_and_saturates() {
        let config = BucketConfig::new(10.0, 3.0);
        let bucket = TokenBucket {
            tokens: 9.0,
            last_refill_ms: 1_000,
        };
        // One token at 3/s is 333.33 ms
        assert_eq!(full_at_ms(&bucket, &config), 1_334);
        assert_eq!(full_at_ms(&TokenBucket::full(&config, 50), &config), 50);

        let frozen = BucketConfig::new(10.0, 0.0);
        assert_eq!(full_at_ms(&bucket, &frozen), u64::MAX);
    }

    #[tokio::test]
    async fn test_open_rejects_unknown_scheme() {
        assert!(open("redis://localhost").await.is_err());
        assert!(open("memory").await.is_ok());
    }
}
