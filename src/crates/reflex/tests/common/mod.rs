//! Shared helpers for reflex integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use reflex::clock::ManualClock;
use reflex::store::{
    Admission, BucketRequest, BucketStore, CacheStore, MemoryStore, StoreError, StoreResult, Stores,
};
use reflex::{ReflexConfig, ReflexPipeline};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tooling::rate_limit::BucketConfig;

/// Config with a deadline loose enough for debug builds
pub fn test_config() -> ReflexConfig {
    ReflexConfig {
        pipeline_deadline_ms: 10_000,
        coalesce_wait_ms: 5_000,
        ..ReflexConfig::default()
    }
}

pub fn memory_pipeline(config: ReflexConfig) -> (ReflexPipeline, ManualClock) {
    let clock = ManualClock::new(1_700_000_000_000);
    let pipeline = ReflexPipeline::new(&config, Stores::memory(), Arc::new(clock.clone()));
    (pipeline, clock)
}

/// Store that can be switched off to simulate an outage
#[derive(Debug, Clone, Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    down: Arc<AtomicBool>,
}

impl FlakyStore {
    pub fn down() -> Self {
        let store = Self::default();
        store.set_down(true);
        store
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> StoreResult<()> {
        if self.down.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CacheStore for FlakyStore {
    async fn get(&self, key: &str, now_ms: u64) -> StoreResult<Option<Vec<u8>>> {
        self.check()?;
        self.inner.get(key, now_ms).await
    }

    async fn put(&self, key: &str, value: Vec<u8>, expires_at_ms: u64) -> StoreResult<()> {
        self.check()?;
        self.inner.put(key, value, expires_at_ms).await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn purge_expired(&self, now_ms: u64) -> StoreResult<u64> {
        self.check()?;
        self.inner.purge_expired(now_ms).await
    }
}

#[async_trait]
impl BucketStore for FlakyStore {
    async fn consume_all(&self, requests: &[BucketRequest], now_ms: u64) -> StoreResult<Admission> {
        self.check()?;
        self.inner.consume_all(requests, now_ms).await
    }

    async fn peek(&self, key: &str, config: &BucketConfig, now_ms: u64) -> StoreResult<u64> {
        self.check()?;
        self.inner.peek(key, config, now_ms).await
    }

    async fn purge_idle(&self, now_ms: u64) -> StoreResult<u64> {
        self.check()?;
        self.inner.purge_idle(now_ms).await
    }
}

/// Cache whose lookups take `delay`
#[derive(Debug, Clone, Default)]
pub struct SlowStore {
    inner: MemoryStore,
    delay: Duration,
}

impl SlowStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MemoryStore::new(),
            delay,
        }
    }
}

#[async_trait]
impl CacheStore for SlowStore {
    async fn get(&self, key: &str, now_ms: u64) -> StoreResult<Option<Vec<u8>>> {
        tokio::time::sleep(self.delay).await;
        self.inner.get(key, now_ms).await
    }

    async fn put(&self, key: &str, value: Vec<u8>, expires_at_ms: u64) -> StoreResult<()> {
        self.inner.put(key, value, expires_at_ms).await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.inner.delete(key).await
    }

    async fn purge_expired(&self, now_ms: u64) -> StoreResult<u64> {
        self.inner.purge_expired(now_ms).await
    }
}
