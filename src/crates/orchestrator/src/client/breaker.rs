//! Per-dependency circuit breakers
//!
//! `closed → open` after `threshold` consecutive failures, `open → half_open`
//! once `cooldown` has elapsed, and a single probe call decides between
//! `closed` and `open` again. While a probe is in flight every other call
//! is short-circuited. Calls admitted before the breaker opened may still
//! settle later; only the probe can close it.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Suggested wait while a half-open probe is running
const PROBE_RETRY_AFTER: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerStatus {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerStatus::Closed => "closed",
            BreakerStatus::Open => "open",
            BreakerStatus::HalfOpen => "half_open",
        }
    }

    /// Value exported on the breaker state gauge
    pub fn gauge_value(&self) -> f64 {
        match self {
            BreakerStatus::Closed => 0.0,
            BreakerStatus::HalfOpen => 1.0,
            BreakerStatus::Open => 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    pub threshold: u32,
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

/// Point-in-time view of one breaker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitBreakerState {
    pub status: BreakerStatus,
    pub consecutive_failures: u32,
    /// Time since the breaker last opened
    #[serde(skip)]
    pub opened_for: Option<Duration>,
}

#[derive(Debug)]
struct Inner {
    status: BreakerStatus,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                status: BreakerStatus::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitBreakerState {
        let inner = self.inner.lock();
        CircuitBreakerState {
            status: inner.status,
            consecutive_failures: inner.consecutive_failures,
            opened_for: inner.opened_at.map(|at| at.elapsed()),
        }
    }

    /// Admit a call, or return the suggested wait when short-circuited
    pub fn try_acquire(&self) -> Result<BreakerPermit<'_>, Duration> {
        let mut inner = self.inner.lock();
        match inner.status {
            BreakerStatus::Closed => Ok(BreakerPermit::new(self, false)),
            BreakerStatus::Open => {
                let elapsed = inner.opened_at.map(|at| at.elapsed()).unwrap_or(self.config.cooldown);
                if elapsed >= self.config.cooldown {
                    inner.status = BreakerStatus::HalfOpen;
                    inner.probe_in_flight = true;
                    info!(dependency = %self.name, "Circuit half-open, sending probe");
                    Ok(BreakerPermit::new(self, true))
                } else {
                    Err(self.config.cooldown - elapsed)
                }
            }
            BreakerStatus::HalfOpen if inner.probe_in_flight => {
                Err(PROBE_RETRY_AFTER.min(self.config.cooldown))
            }
            BreakerStatus::HalfOpen => {
                inner.probe_in_flight = true;
                Ok(BreakerPermit::new(self, true))
            }
        }
    }

    fn record_success(&self, probe: bool) {
        let mut inner = self.inner.lock();
        if inner.status != BreakerStatus::Closed {
            if !probe {
                debug!(dependency = %self.name, status = inner.status.as_str(), "Ignoring late success");
                return;
            }
            info!(dependency = %self.name, "Circuit closed");
        }
        inner.status = BreakerStatus::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.probe_in_flight = false;
    }

    fn record_failure(&self, probe: bool) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);

        let reopen = probe && inner.status == BreakerStatus::HalfOpen;
        let trip = inner.status == BreakerStatus::Closed
            && inner.consecutive_failures >= self.config.threshold;

        if reopen || trip {
            inner.status = BreakerStatus::Open;
            inner.opened_at = Some(Instant::now());
            warn!(
                dependency = %self.name,
                failures = inner.consecutive_failures,
                cooldown_ms = self.config.cooldown.as_millis() as u64,
                "Circuit opened"
            );
        }
        if probe {
            inner.probe_in_flight = false;
        }
    }

    fn release_probe(&self) {
        self.inner.lock().probe_in_flight = false;
    }
}

/// Admission for one call; settle it with [`success`](Self::success) or
/// [`failure`](Self::failure)
///
/// Dropping an unsettled probe permit frees the probe slot without changing
/// the breaker state.
#[must_use]
#[derive(Debug)]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl<'a> BreakerPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, probe: bool) -> Self {
        Self {
            breaker,
            probe,
            settled: false,
        }
    }

    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record_success(self.probe);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.record_failure(self.probe);
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            self.breaker.release_probe();
        }
    }
}

/// Breakers keyed by dependency name, created on first use
#[derive(Debug)]
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    pub fn config(&self) -> BreakerConfig {
        self.config
    }

    pub fn get(&self, dependency: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(dependency) {
            return Arc::clone(existing.value());
        }
        self.breakers
            .entry(dependency.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(dependency, self.config)))
            .value()
            .clone()
    }

    /// Every known breaker, sorted by dependency name
    pub fn snapshot(&self) -> Vec<(String, CircuitBreakerState)> {
        let mut states: Vec<_> = self
            .breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().state()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}
