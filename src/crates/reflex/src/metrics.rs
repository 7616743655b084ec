//! Reflex pipeline metrics
//!
//! Plain atomic counters and histograms from `tooling::metrics`, rendered
//! on demand into Prometheus text.

use std::time::Duration;
use tooling::metrics::{Counter, Histogram, PromWriter};

use crate::cache::CacheStats;
use crate::ratelimit::Dimension;

#[derive(Debug, Clone)]
pub struct ReflexMetrics {
    pub requests: Counter,
    pub unsafe_verdicts: Counter,
    pub degraded: Counter,
    pub errors: Counter,
    pub deadline_exceeded: Counter,
    denied: [Counter; 4],
    pub pipeline_latency: Histogram,
    pub pii_latency: Histogram,
    pub injection_latency: Histogram,
}

impl Default for ReflexMetrics {
    fn default() -> Self {
        Self {
            requests: Counter::new(),
            unsafe_verdicts: Counter::new(),
            degraded: Counter::new(),
            errors: Counter::new(),
            deadline_exceeded: Counter::new(),
            denied: Default::default(),
            pipeline_latency: Histogram::latency(),
            pii_latency: Histogram::latency(),
            injection_latency: Histogram::latency(),
        }
    }
}

impl ReflexMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(dimension: Dimension) -> usize {
        match dimension {
            Dimension::User => 0,
            Dimension::Ip => 1,
            Dimension::Endpoint => 2,
            Dimension::Global => 3,
        }
    }

    pub fn record_denied(&self, dimension: Dimension) {
        self.denied[Self::slot(dimension)].inc();
    }

    pub fn denied(&self, dimension: Dimension) -> u64 {
        self.denied[Self::slot(dimension)].get()
    }

    pub fn observe_pii(&self, elapsed: Duration) {
        self.pii_latency.observe(elapsed);
    }

    pub fn observe_injection(&self, elapsed: Duration) {
        self.injection_latency.observe(elapsed);
    }

    /// Prometheus text for the pipeline and its cache
    pub fn render(&self, cache: &CacheStats) -> String {
        let mut writer = PromWriter::new();
        writer
            .counter(
                "reflex_requests_total",
                "Preprocess requests received",
                self.requests.get(),
            )
            .counter(
                "reflex_unsafe_total",
                "Requests judged unsafe",
                self.unsafe_verdicts.get(),
            )
            .counter(
                "reflex_degraded_total",
                "Requests served without cache and rate limiting",
                self.degraded.get(),
            )
            .counter(
                "reflex_errors_total",
                "Requests that ended in an error",
                self.errors.get(),
            )
            .counter(
                "reflex_deadline_exceeded_total",
                "Requests that ran past the pipeline deadline",
                self.deadline_exceeded.get(),
            )
            .counter_family(
                "reflex_rate_limited_total",
                "Rate-limit denials by dimension",
                Dimension::ALL
                    .iter()
                    .map(|d| (vec![("dimension", d.to_string())], self.denied(*d))),
            )
            .counter("reflex_cache_hits_total", "Cache hits", cache.hits)
            .counter("reflex_cache_misses_total", "Cache misses", cache.misses)
            .counter(
                "reflex_cache_coalesced_total",
                "Misses served by a concurrent computation",
                cache.coalesced,
            )
            .gauge("reflex_cache_hit_rate", "Cache hit ratio", cache.hit_rate)
            .histogram(
                "reflex_pipeline_latency_seconds",
                "End-to-end preprocess latency",
                &self.pipeline_latency.snapshot(),
            )
            .histogram(
                "reflex_pii_detect_seconds",
                "PII detector latency",
                &self.pii_latency.snapshot(),
            )
            .histogram(
                "reflex_injection_detect_seconds",
                "Injection detector latency",
                &self.injection_latency.snapshot(),
            );
        writer.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_dimensions() {
        let metrics = ReflexMetrics::new();
        metrics.requests.add(3);
        metrics.record_denied(Dimension::Ip);
        metrics.observe_pii(Duration::from_micros(300));

        let text = metrics.render(&CacheStats::default());
        assert!(text.contains("reflex_requests_total 3"));
        assert!(text.contains("reflex_rate_limited_total{dimension=\"ip\"} 1"));
        assert!(text.contains("reflex_rate_limited_total{dimension=\"user\"} 0"));
        assert!(text.contains("reflex_pii_detect_seconds_count 1"));
    }
}
