//! Reflex pipeline
//!
//! One `process` call runs, in order: cache lookup, rate-limit admission,
//! then both detectors side by side, and finally verdict assembly and a
//! cache write. The whole call is bounded by a deadline and can be
//! cancelled from outside.
//!
//! When the shared store fails, [`FailurePolicy`] decides what happens:
//! `FailOpen` keeps answering with detectors only (no cache, no rate
//! limiting) and marks the result `degraded`; `FailClosed` rejects the
//! request with [`ReflexError::StoreUnavailable`].
//!
//! Expired verdicts and idle buckets are only dropped lazily on lookup, so
//! long-running services also run [`ReflexPipeline::spawn_janitor`].

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cache::{cache_key, CacheConfig, Claim, ContentCache, KeyFlags, Leader};
use crate::clock::{Clock, SystemClock};
use crate::config::ReflexConfig;
use crate::injection::{InjectionConfig, InjectionDetector, InjectionFinding, InjectionScan};
use crate::metrics::ReflexMetrics;
use crate::pii::{redact, PiiConfig, PiiDetector, PiiFinding, PiiScan, RedactionStrategy};
use crate::ratelimit::{Caller, Decision, RateLimiter};
use crate::store::{self, StoreError, Stores};
use crate::text::{normalize, truncate_chars};
use crate::{ReflexError, Result, Severity};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessRequest {
    pub text: String,

    #[serde(default = "default_true")]
    pub check_pii: bool,

    #[serde(default = "default_true")]
    pub check_injection: bool,

    /// Produce `redacted_text` with this strategy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redact: Option<RedactionStrategy>,
}

impl PreprocessRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            check_pii: true,
            check_injection: true,
            redact: None,
        }
    }

    pub fn with_redaction(mut self, strategy: RedactionStrategy) -> Self {
        self.redact = Some(strategy);
        self
    }

    fn flags(&self) -> KeyFlags {
        KeyFlags {
            check_pii: self.check_pii,
            check_injection: self.check_injection,
            redact: self.redact,
        }
    }
}

/// Verdict for one request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreprocessResult {
    pub request_id: Uuid,

    pub safe: bool,

    pub pii_findings: Vec<PiiFinding>,

    pub injection_findings: Vec<InjectionFinding>,

    /// Highest severity score over all findings, 0 when clean
    pub risk_score: u8,

    /// Served from the cache or from a concurrent identical request
    pub cached: bool,

    /// Shared store was unavailable; no cache or rate limiting applied
    #[serde(default)]
    pub degraded: bool,

    /// Input was cut to the size ceiling before scanning
    #[serde(default)]
    pub truncated: bool,

    pub latency_ms: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redacted_text: Option<String>,
}

/// What to do when the shared store is unreachable
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Detectors only, result marked `degraded`
    #[default]
    FailOpen,
    /// Reject with `StoreUnavailable`
    FailClosed,
}

impl FailurePolicy {
    pub fn from_fail_open(fail_open: bool) -> Self {
        if fail_open {
            FailurePolicy::FailOpen
        } else {
            FailurePolicy::FailClosed
        }
    }
}

/// Counts from one [`ReflexPipeline::purge`] pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Purged {
    pub cache_entries: u64,
    pub buckets: u64,
}

#[derive(Clone)]
pub struct ReflexPipeline {
    pii: PiiDetector,
    injection: InjectionDetector,
    cache: ContentCache,
    limiter: RateLimiter,
    metrics: ReflexMetrics,
    policy: FailurePolicy,
    version: String,
    deadline: Duration,
    coalesce_wait: Duration,
    max_input_chars: usize,
    block_severity: Severity,
}

impl std::fmt::Debug for ReflexPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReflexPipeline")
            .field("policy", &self.policy)
            .field("version", &self.version)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl ReflexPipeline {
    /// Build a pipeline over explicit stores and clock
    pub fn new(config: &ReflexConfig, stores: Stores, clock: Arc<dyn Clock>) -> Self {
        let pii = PiiDetector::new(PiiConfig {
            pattern_set: config.pii_pattern_set,
            max_input_chars: config.max_input_chars,
            ..PiiConfig::default()
        });
        let injection = InjectionDetector::new(InjectionConfig {
            mode: config.injection_mode,
            max_input_chars: config.max_input_chars,
            ..InjectionConfig::default()
        });
        let cache = ContentCache::new(
            stores.cache,
            clock.clone(),
            CacheConfig {
                ttl_safe: Duration::from_secs(config.cache_ttl_safe),
                ttl_unsafe: Duration::from_secs(config.cache_ttl_unsafe),
            },
        );
        let limiter = RateLimiter::new(stores.buckets, clock, config.rate_limit_policy());

        Self {
            pii,
            injection,
            cache,
            limiter,
            metrics: ReflexMetrics::new(),
            policy: FailurePolicy::from_fail_open(config.fail_open),
            version: config.version_tag(),
            deadline: config.deadline(),
            coalesce_wait: config.coalesce_wait(),
            max_input_chars: config.max_input_chars,
            block_severity: config.block_severity,
        }
    }

    /// Open the configured store and build a pipeline on the system clock
    pub async fn from_config(config: ReflexConfig) -> Result<Self> {
        let stores = store::open(&config.store_url)
            .await
            .map_err(|e| ReflexError::Config(e.to_string()))?;
        tracing::info!(
            store = %config.store_url,
            fail_open = config.fail_open,
            deadline_ms = config.pipeline_deadline_ms,
            "Reflex pipeline ready"
        );
        Ok(Self::new(&config, stores, Arc::new(SystemClock)))
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn metrics(&self) -> &ReflexMetrics {
        &self.metrics
    }

    /// Prometheus text for this pipeline
    pub fn render_metrics(&self) -> String {
        self.metrics.render(&self.cache.stats())
    }

    /// Drop expired cache entries and rate-limit buckets that are full again
    pub async fn purge(&self) -> Result<Purged> {
        let cache_entries = self.cache.purge_expired().await?;
        let buckets = self.limiter.purge_idle().await?;
        Ok(Purged {
            cache_entries,
            buckets,
        })
    }

    /// Run [`purge`](Self::purge) every `every` until `shutdown` fires
    pub fn spawn_janitor(&self, every: Duration, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        let pipeline = self.clone();
        let every = every.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = ticker.tick() => match pipeline.purge().await {
                        Ok(purged) => tracing::debug!(
                            cache_entries = purged.cache_entries,
                            buckets = purged.buckets,
                            "Reflex store purged"
                        ),
                        Err(e) => tracing::warn!("Reflex store purge failed: {}", e),
                    },
                }
            }
        })
    }

    /// Screen one request within the configured deadline
    pub async fn process(&self, req: PreprocessRequest, caller: &Caller) -> Result<PreprocessResult> {
        self.process_with(req, caller, self.deadline, None).await
    }

    /// Screen one request within `budget`, abandoning it if `cancel` fires
    pub async fn process_with(
        &self,
        req: PreprocessRequest,
        caller: &Caller,
        budget: Duration,
        cancel: Option<CancellationToken>,
    ) -> Result<PreprocessResult> {
        if req.text.trim().is_empty() {
            return Err(ReflexError::Validation("text must not be empty".into()));
        }

        self.metrics.requests.inc();
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + budget;
        let cancel = cancel.unwrap_or_default();

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ReflexError::Cancelled),
            run = tokio::time::timeout_at(deadline, self.run(req, caller, started, deadline)) => {
                run.unwrap_or_else(|_| {
                    self.metrics.deadline_exceeded.inc();
                    Err(ReflexError::DeadlineExceeded(budget))
                })
            }
        };

        self.metrics.pipeline_latency.observe(started.elapsed());
        match &outcome {
            Ok(result) => {
                if !result.safe {
                    self.metrics.unsafe_verdicts.inc();
                }
            }
            Err(ReflexError::RateLimited { .. }) => {}
            Err(_) => self.metrics.errors.inc(),
        }
        outcome
    }

    async fn run(
        &self,
        req: PreprocessRequest,
        caller: &Caller,
        started: Instant,
        deadline: tokio::time::Instant,
    ) -> Result<PreprocessResult> {
        let (kept, truncated) = truncate_chars(&req.text, self.max_input_chars);
        let normalized = normalize(kept);
        let key = cache_key(&self.version, &req.flags(), &normalized);
        let key_prefix = &key[..key.len().min(24)];
        let mut degraded = false;

        match self.cache.get(&key).await {
            Ok(Some(hit)) => {
                tracing::debug!(key = %key_prefix, "Cache hit");
                return Ok(served_from_cache(hit, started));
            }
            Ok(None) => {}
            Err(e) => {
                self.store_failed("cache lookup", e)?;
                degraded = true;
            }
        }

        let coalesced = if degraded {
            Coalesced::Alone
        } else {
            self.lead_or_follow(&key, started, deadline).await?
        };
        let leader = match coalesced {
            Coalesced::Result(result) => return Ok(*result),
            Coalesced::Lead(leader) => Some(leader),
            Coalesced::Alone => None,
            Coalesced::Degraded => {
                degraded = true;
                None
            }
        };

        if !degraded {
            match self.limiter.check_and_consume(caller, 1.0).await {
                Ok(Decision::Allowed { .. }) => {}
                Ok(Decision::Denied {
                    dimension,
                    retry_after,
                }) => {
                    self.metrics.record_denied(dimension);
                    tracing::info!(dimension = %dimension, retry_after_ms = retry_after.as_millis() as u64, "Request rate limited");
                    return Err(ReflexError::RateLimited {
                        dimension,
                        retry_after,
                    });
                }
                Err(e) => {
                    self.store_failed("rate limit", e)?;
                    degraded = true;
                }
            }
        }

        let (pii_scan, injection_scan) = self.detect(&req, &normalized).await?;

        let mut result = self.assemble(&req, &normalized, pii_scan, injection_scan);
        result.truncated |= truncated;
        result.degraded = degraded;

        if !degraded {
            if let Err(e) = self.cache.put(&key, &result).await {
                self.store_failed("cache write", e)?;
                result.degraded = true;
            }
        }
        if let Some(leader) = leader {
            leader.publish(&result);
        }

        result.latency_ms = elapsed_ms(started);
        tracing::debug!(
            key = %key_prefix,
            safe = result.safe,
            pii = result.pii_findings.len(),
            injection = result.injection_findings.len(),
            latency_ms = result.latency_ms,
            "Request screened"
        );
        Ok(result)
    }

    async fn lead_or_follow(
        &self,
        key: &str,
        started: Instant,
        deadline: tokio::time::Instant,
    ) -> Result<Coalesced> {
        let follower = match self.cache.claim(key) {
            Claim::Leader(leader) => {
                // The previous leader may have written between our lookup and claim
                return Ok(match self.cache.recheck(key).await {
                    Ok(Some(hit)) => {
                        leader.publish(&hit);
                        Coalesced::Result(Box::new(served_from_cache(hit, started)))
                    }
                    Ok(None) => Coalesced::Lead(leader),
                    Err(e) => {
                        self.store_failed("cache lookup", e)?;
                        Coalesced::Degraded
                    }
                });
            }
            Claim::Follower(follower) => follower,
        };

        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let wait = self.coalesce_wait.min(remaining);
        match follower.wait(wait).await {
            Some(result) => {
                self.cache.record_coalesced();
                Ok(Coalesced::Result(Box::new(served_from_cache(result, started))))
            }
            None => {
                tracing::debug!("Concurrent computation unavailable, computing independently");
                Ok(Coalesced::Alone)
            }
        }
    }

    async fn detect(&self, req: &PreprocessRequest, normalized: &str) -> Result<(PiiScan, InjectionScan)> {
        let text: Arc<str> = Arc::from(normalized);

        let pii = async {
            if !req.check_pii {
                return Ok(PiiScan::default());
            }
            let detector = self.pii.clone();
            let metrics = self.metrics.clone();
            let text = text.clone();
            tokio::task::spawn_blocking(move || {
                let started = Instant::now();
                let scan = detector.scan(&text);
                metrics.observe_pii(started.elapsed());
                scan
            })
            .await
            .map_err(|e| ReflexError::Internal(format!("PII detector task failed: {}", e)))
        };

        let injection = async {
            if !req.check_injection {
                return Ok(InjectionScan::default());
            }
            let detector = self.injection.clone();
            let metrics = self.metrics.clone();
            let text = text.clone();
            tokio::task::spawn_blocking(move || {
                let started = Instant::now();
                let scan = detector.scan(&text);
                metrics.observe_injection(started.elapsed());
                scan
            })
            .await
            .map_err(|e| ReflexError::Internal(format!("Injection detector task failed: {}", e)))
        };

        tokio::try_join!(pii, injection)
    }

    fn assemble(
        &self,
        req: &PreprocessRequest,
        normalized: &str,
        pii: PiiScan,
        injection: InjectionScan,
    ) -> PreprocessResult {
        let blocking_injection = injection
            .findings
            .iter()
            .any(|f| f.severity >= self.block_severity);
        let safe = pii.findings.is_empty() && !blocking_injection;

        let pii_score = pii
            .findings
            .iter()
            .map(|f| f.severity.score())
            .max()
            .unwrap_or(0);
        let risk_score = pii_score.max(injection.risk_score);

        let redacted_text = req
            .redact
            .map(|strategy| redact(normalized, &pii.findings, strategy));

        PreprocessResult {
            request_id: Uuid::new_v4(),
            safe,
            truncated: pii.truncated || injection.truncated,
            pii_findings: pii.findings,
            injection_findings: injection.findings,
            risk_score,
            cached: false,
            degraded: false,
            latency_ms: 0.0,
            redacted_text,
        }
    }

    fn store_failed(&self, stage: &str, err: StoreError) -> Result<()> {
        match self.policy {
            FailurePolicy::FailOpen => {
                self.metrics.degraded.inc();
                tracing::warn!(stage, error = %err, "Store unavailable, continuing without cache and rate limiting");
                Ok(())
            }
            FailurePolicy::FailClosed => {
                tracing::error!(stage, error = %err, "Store unavailable, rejecting request");
                Err(err.into())
            }
        }
    }
}

enum Coalesced {
    Lead(Leader),
    Result(Box<PreprocessResult>),
    /// Compute without leadership
    Alone,
    /// Store failed after the lookup; compute without cache or limits
    Degraded,
}

fn served_from_cache(mut result: PreprocessResult, started: Instant) -> PreprocessResult {
    result.request_id = Uuid::new_v4();
    result.cached = true;
    result.degraded = false;
    result.latency_ms = elapsed_ms(started);
    result
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}
