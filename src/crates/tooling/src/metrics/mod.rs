//! Lock-free metric primitives and Prometheus text rendering
//!
//! Counters and histograms are plain atomics so hot paths never take a lock.
//! Each service owns its metric structs and renders them with
//! [`PromWriter`] when `/metrics` is scraped.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Monotonic counter
#[derive(Debug, Clone, Default)]
pub struct Counter(Arc<AtomicU64>);

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.add(1);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Value that can go up and down
#[derive(Debug, Clone, Default)]
pub struct Gauge(Arc<AtomicU64>);

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, value: u64) {
        self.0.store(value, Ordering::Relaxed);
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement, saturating at zero
    pub fn dec(&self) {
        let _ = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1)));
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Default latency buckets in seconds, sized for millisecond-scale work
pub const LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Fixed-bucket histogram of durations
#[derive(Debug, Clone)]
pub struct Histogram {
    inner: Arc<HistogramInner>,
}

#[derive(Debug)]
struct HistogramInner {
    bounds: Vec<f64>,
    buckets: Vec<AtomicU64>,
    count: AtomicU64,
    sum_micros: AtomicU64,
}

/// Point-in-time copy of a histogram
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramSnapshot {
    /// `(upper bound, cumulative count)` pairs
    pub buckets: Vec<(f64, u64)>,
    pub count: u64,
    pub sum_seconds: f64,
}

impl Histogram {
    pub fn new(bounds: &[f64]) -> Self {
        Self {
            inner: Arc::new(HistogramInner {
                bounds: bounds.to_vec(),
                buckets: bounds.iter().map(|_| AtomicU64::new(0)).collect(),
                count: AtomicU64::new(0),
                sum_micros: AtomicU64::new(0),
            }),
        }
    }

    pub fn latency() -> Self {
        Self::new(LATENCY_BUCKETS)
    }

    pub fn observe(&self, duration: Duration) {
        let secs = duration.as_secs_f64();
        if let Some(idx) = self.inner.bounds.iter().position(|b| secs <= *b) {
            self.inner.buckets[idx].fetch_add(1, Ordering::Relaxed);
        }
        self.inner.count.fetch_add(1, Ordering::Relaxed);
        self.inner
            .sum_micros
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        let mut cumulative = 0;
        let buckets = self
            .inner
            .bounds
            .iter()
            .zip(&self.inner.buckets)
            .map(|(bound, bucket)| {
                cumulative += bucket.load(Ordering::Relaxed);
                (*bound, cumulative)
            })
            .collect();

        HistogramSnapshot {
            buckets,
            count: self.inner.count.load(Ordering::Relaxed),
            sum_seconds: self.inner.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0,
        }
    }
}

/// Builder for the Prometheus text exposition format
#[derive(Debug, Default)]
pub struct PromWriter {
    out: String,
}

impl PromWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter with no labels
    pub fn counter(&mut self, name: &str, help: &str, value: u64) -> &mut Self {
        self.header(name, help, "counter");
        let _ = writeln!(self.out, "{} {}", name, value);
        self
    }

    /// Counter family; one sample per label set
    pub fn counter_family<'a, I>(&mut self, name: &str, help: &str, samples: I) -> &mut Self
    where
        I: IntoIterator<Item = (Vec<(&'a str, String)>, u64)>,
    {
        self.header(name, help, "counter");
        for (labels, value) in samples {
            let _ = writeln!(self.out, "{}{} {}", name, render_labels(&labels), value);
        }
        self
    }

    /// Gauge family; one sample per label set
    pub fn gauge_family<'a, I>(&mut self, name: &str, help: &str, samples: I) -> &mut Self
    where
        I: IntoIterator<Item = (Vec<(&'a str, String)>, f64)>,
    {
        self.header(name, help, "gauge");
        for (labels, value) in samples {
            let _ = writeln!(self.out, "{}{} {}", name, render_labels(&labels), value);
        }
        self
    }

    pub fn gauge(&mut self, name: &str, help: &str, value: f64) -> &mut Self {
        self.gauge_family(name, help, [(Vec::new(), value)])
    }

    pub fn histogram(&mut self, name: &str, help: &str, snapshot: &HistogramSnapshot) -> &mut Self {
        self.header(name, help, "histogram");
        for (bound, count) in &snapshot.buckets {
            let _ = writeln!(self.out, "{}_bucket{{le=\"{}\"}} {}", name, bound, count);
        }
        let _ = writeln!(self.out, "{}_bucket{{le=\"+Inf\"}} {}", name, snapshot.count);
        let _ = writeln!(self.out, "{}_sum {}", name, snapshot.sum_seconds);
        let _ = writeln!(self.out, "{}_count {}", name, snapshot.count);
        self
    }

    /// Append text rendered by another writer
    pub fn extend(&mut self, rendered: &str) -> &mut Self {
        self.out.push_str(rendered);
        self
    }

    pub fn finish(self) -> String {
        self.out
    }

    fn header(&mut self, name: &str, help: &str, kind: &str) {
        let _ = writeln!(self.out, "# HELP {} {}", name, help);
        let _ = writeln!(self.out, "# TYPE {} {}", name, kind);
    }
}

fn render_labels(labels: &[(&str, String)]) -> String {
    if labels.is_empty() {
        return String::new();
    }
    let inner: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, v.replace('\\', "\\\\").replace('"', "\\\"")))
        .collect();
    format!("{{{}}}", inner.join(","))
}
