//! Process-local backend
//!
//! Cache entries live in a `DashMap`; buckets share one mutex so an
//! admission across several dimensions is a single critical section.
//! Each bucket remembers when it will be full again so idle ones can be
//! evicted without knowing their config.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tooling::rate_limit::{BucketConfig, TokenBucket};

use super::{full_at_ms, longest_wait, Admission, BucketRequest, BucketStore, CacheStore, StoreResult};

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at_ms: u64,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    bucket: TokenBucket,
    full_at_ms: u64,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, Entry>>,
    buckets: Arc<Mutex<HashMap<String, Slot>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache entries currently held, expired or not
    pub fn cache_len(&self) -> usize {
        self.entries.len()
    }

    /// Token buckets currently held
    pub fn bucket_len(&self) -> usize {
        self.buckets.lock().len()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str, now_ms: u64) -> StoreResult<Option<Vec<u8>>> {
        let expired = match self.entries.get(key) {
            Some(entry) if entry.expires_at_ms > now_ms => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries
                .remove_if(key, |_, entry| entry.expires_at_ms <= now_ms);
        }
        Ok(None)
    }

    async fn put(&self, key: &str, value: Vec<u8>, expires_at_ms: u64) -> StoreResult<()> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at_ms,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn purge_expired(&self, now_ms: u64) -> StoreResult<u64> {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at_ms > now_ms);
        Ok(before.saturating_sub(self.entries.len()) as u64)
    }
}

#[async_trait]
impl BucketStore for MemoryStore {
    async fn consume_all(&self, requests: &[BucketRequest], now_ms: u64) -> StoreResult<Admission> {
        let mut buckets = self.buckets.lock();

        let mut exhausted = Vec::new();
        for (index, req) in requests.iter().enumerate() {
            let slot = buckets.entry(req.key.clone()).or_insert_with(|| Slot {
                bucket: TokenBucket::full(&req.config, now_ms),
                full_at_ms: now_ms,
            });
            if let Err(e) = slot.bucket.check(&req.config, req.cost, now_ms) {
                exhausted.push((index, e.retry_after));
            }
        }

        if let Some((index, retry_after)) = longest_wait(&exhausted) {
            return Ok(Admission::Denied { index, retry_after });
        }

        let mut remaining = Vec::with_capacity(requests.len());
        for req in requests {
            if let Some(slot) = buckets.get_mut(&req.key) {
                slot.bucket.tokens = (slot.bucket.tokens - req.cost).max(0.0);
                slot.full_at_ms = full_at_ms(&slot.bucket, &req.config);
                remaining.push(slot.bucket.available());
            }
        }
        Ok(Admission::Allowed { remaining })
    }

    async fn peek(&self, key: &str, config: &BucketConfig, now_ms: u64) -> StoreResult<u64> {
        let mut buckets = self.buckets.lock();
        let available = match buckets.get_mut(key) {
            Some(slot) => {
                slot.bucket.refill(config, now_ms);
                slot.bucket.available()
            }
            None => TokenBucket::full(config, now_ms).available(),
        };
        Ok(available)
    }

    async fn purge_idle(&self, now_ms: u64) -> StoreResult<u64> {
        let mut buckets = self.buckets.lock();
        let before = buckets.len();
        buckets.retain(|_, slot| slot.full_at_ms > now_ms);
        Ok(before.saturating_sub(buckets.len()) as u64)
    }
}
