//! Content-addressed verdict cache
//!
//! Keys are a SHA-256 over the detector version tag, the request flags and
//! the normalized text, so a catalog upgrade or a different flag set never
//! reuses an old verdict. Unsafe verdicts expire quickly, safe ones slowly.
//!
//! Concurrent misses on one key are coalesced: the first caller becomes the
//! [`Leader`] and computes, later callers get a [`Follower`] that waits a
//! bounded time for the leader's result. A leader dropped without
//! publishing (denied, failed, timed out) releases its followers at once.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tooling::metrics::Counter;

use crate::clock::Clock;
use crate::pii::RedactionStrategy;
use crate::pipeline::PreprocessResult;
use crate::store::{CacheStore, StoreResult};

pub const KEY_PREFIX: &str = "reflex:v1:";

/// Request options that change the verdict and so belong in the key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyFlags {
    pub check_pii: bool,
    pub check_injection: bool,
    pub redact: Option<RedactionStrategy>,
}

impl KeyFlags {
    fn encode(&self) -> String {
        format!(
            "pii={};inj={};redact={}",
            self.check_pii,
            self.check_injection,
            self.redact.map(|r| r.as_str()).unwrap_or("none")
        )
    }
}

/// Derive the cache key for already-normalized text
pub fn cache_key(version: &str, flags: &KeyFlags, normalized: &str) -> String {
    let digest = tooling::serialization::digest_parts(&[
        version.as_bytes(),
        flags.encode().as_bytes(),
        normalized.as_bytes(),
    ]);
    format!("{}{}", KEY_PREFIX, digest)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheConfig {
    pub ttl_safe: Duration,
    pub ttl_unsafe: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_safe: Duration::from_secs(3600),
            ttl_unsafe: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Counters {
    hits: Counter,
    misses: Counter,
    writes: Counter,
    coalesced: Counter,
    errors: Counter,
}

/// Point-in-time cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub coalesced: u64,
    pub errors: u64,
    pub hit_rate: f64,
}

type Slot = watch::Receiver<Option<Arc<PreprocessResult>>>;
type InFlight = DashMap<String, (u64, Slot)>;

/// Outcome of [`ContentCache::claim`]
pub enum Claim {
    Leader(Leader),
    Follower(Follower),
}

/// Sole computer of a key until dropped
pub struct Leader {
    key: String,
    id: u64,
    tx: watch::Sender<Option<Arc<PreprocessResult>>>,
    inflight: Arc<InFlight>,
}

impl Leader {
    /// Hand the result to every waiting follower
    pub fn publish(self, result: &PreprocessResult) {
        // No receivers left is fine
        let _ = self.tx.send(Some(Arc::new(result.clone())));
    }
}

impl Drop for Leader {
    fn drop(&mut self) {
        let id = self.id;
        self.inflight.remove_if(&self.key, |_, (slot_id, _)| *slot_id == id);
    }
}

/// Waiter on another caller's computation
pub struct Follower {
    rx: Slot,
}

impl Follower {
    /// The leader's result, or `None` if it gave up or `wait` elapsed
    pub async fn wait(mut self, wait: Duration) -> Option<PreprocessResult> {
        let outcome = tokio::time::timeout(wait, async {
            loop {
                if let Some(result) = self.rx.borrow().as_ref() {
                    return Some(result.as_ref().clone());
                }
                if self.rx.changed().await.is_err() {
                    return self.rx.borrow().as_ref().map(|r| r.as_ref().clone());
                }
            }
        })
        .await;
        outcome.ok().flatten()
    }
}

#[derive(Clone)]
pub struct ContentCache {
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    inflight: Arc<InFlight>,
    next_id: Arc<AtomicU64>,
    counters: Counters,
}

impl std::fmt::Debug for ContentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentCache")
            .field("config", &self.config)
            .field("inflight", &self.inflight.len())
            .finish_non_exhaustive()
    }
}

impl ContentCache {
    pub fn new(store: Arc<dyn CacheStore>, clock: Arc<dyn Clock>, config: CacheConfig) -> Self {
        Self {
            store,
            clock,
            config,
            inflight: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// TTL for a verdict: short when unsafe, long when safe
    pub fn ttl_for(&self, result: &PreprocessResult) -> Duration {
        if result.safe {
            self.config.ttl_safe
        } else {
            self.config.ttl_unsafe
        }
    }

    /// Cached verdict for `key`
    ///
    /// An entry that no longer decodes is deleted and reported as a miss.
    pub async fn get(&self, key: &str) -> StoreResult<Option<PreprocessResult>> {
        self.lookup(key, true).await
    }

    /// Like [`get`](Self::get) but leaves hit and miss counts alone
    ///
    /// For a second look at a key whose first lookup was already counted.
    pub async fn recheck(&self, key: &str) -> StoreResult<Option<PreprocessResult>> {
        self.lookup(key, false).await
    }

    async fn lookup(&self, key: &str, counted: bool) -> StoreResult<Option<PreprocessResult>> {
        let now = self.clock.now_ms();
        let raw = match self.store.get(key, now).await {
            Ok(raw) => raw,
            Err(e) => {
                self.counters.errors.inc();
                return Err(e);
            }
        };

        let Some(bytes) = raw else {
            if counted {
                self.counters.misses.inc();
            }
            return Ok(None);
        };

        match serde_json::from_slice::<PreprocessResult>(&bytes) {
            Ok(result) => {
                if counted {
                    self.counters.hits.inc();
                }
                Ok(Some(result))
            }
            Err(e) => {
                tracing::warn!(key_prefix = %&key[..key.len().min(24)], "Dropping undecodable cache entry: {}", e);
                if counted {
                    self.counters.misses.inc();
                }
                self.store.delete(key).await?;
                Ok(None)
            }
        }
    }

    /// Store a verdict with the TTL its safety class calls for
    pub async fn put(&self, key: &str, result: &PreprocessResult) -> StoreResult<()> {
        let bytes = serde_json::to_vec(result)
            .map_err(|e| crate::store::StoreError::Backend(format!("encode: {}", e)))?;
        let ttl = self.ttl_for(result);
        let expires_at = self.clock.now_ms().saturating_add(ttl.as_millis() as u64);

        match self.store.put(key, bytes, expires_at).await {
            Ok(()) => {
                self.counters.writes.inc();
                Ok(())
            }
            Err(e) => {
                self.counters.errors.inc();
                Err(e)
            }
        }
    }

    /// Become the computer for `key`, or wait on the current one
    pub fn claim(&self, key: &str) -> Claim {
        match self.inflight.entry(key.to_string()) {
            Entry::Occupied(slot) => Claim::Follower(Follower {
                rx: slot.get().1.clone(),
            }),
            Entry::Vacant(slot) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let (tx, rx) = watch::channel(None);
                slot.insert((id, rx));
                Claim::Leader(Leader {
                    key: key.to_string(),
                    id,
                    tx,
                    inflight: self.inflight.clone(),
                })
            }
        }
    }

    /// Count a result obtained from a leader
    pub fn record_coalesced(&self) {
        self.counters.coalesced.inc();
    }

    pub fn in_flight(&self) -> usize {
        self.inflight.len()
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.counters.hits.get();
        let misses = self.counters.misses.get();
        let lookups = hits + misses;
        CacheStats {
            hits,
            misses,
            writes: self.counters.writes.get(),
            coalesced: self.counters.coalesced.get(),
            errors: self.counters.errors.get(),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
        }
    }

    pub async fn purge_expired(&self) -> StoreResult<u64> {
        self.store.purge_expired(self.clock.now_ms()).await
    }
}
