use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

/// In-memory counter. Monotonically increasing.
struct Counter {
    value: AtomicU64,
}

impl Counter {
    fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }
    fn increment(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }
    fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// In-memory gauge. Can go up or down.
struct Gauge {
    // Stored as f64 bits in an i64 so updates stay atomic.
    value: AtomicI64,
}

impl Gauge {
    fn new() -> Self {
        Self {
            value: AtomicI64::new(0),
        }
    }
    fn set(&self, v: f64) {
        self.value.store(v.to_bits() as i64, Ordering::Relaxed);
    }
    fn increment(&self, delta: f64) {
        loop {
            let current = self.value.load(Ordering::Relaxed);
            let current_f = f64::from_bits(current as u64);
            let new_f = current_f + delta;
            if self
                .value
                .compare_exchange_weak(
                    current,
                    new_f.to_bits() as i64,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                break;
            }
        }
    }
    fn get(&self) -> f64 {
        f64::from_bits(self.value.load(Ordering::Relaxed) as u64)
    }
}

/// In-memory histogram. Stores all observations for percentile computation.
struct Histogram {
    observations: Mutex<Vec<f64>>,
}

impl Histogram {
    fn new() -> Self {
        Self {
            observations: Mutex::new(Vec::new()),
        }
    }
    fn observe(&self, value: f64) {
        self.observations.lock().push(value);
    }
    fn summary(&self) -> HistogramSummary {
        let mut obs = self.observations.lock();
        if obs.is_empty() {
            return HistogramSummary::default();
        }
        obs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let count = obs.len();
        let sum: f64 = obs.iter().sum();
        let p50 = obs[count / 2];
        let p95 = obs[((count as f64 * 0.95) as usize).min(count - 1)];
        let p99 = obs[((count as f64 * 0.99) as usize).min(count - 1)];
        HistogramSummary {
            count: count as u64,
            sum,
            p50,
            p95,
            p99,
        }
    }
}

/// Summary statistics from a histogram.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Metric key: name + labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
struct MetricKey {
    name: String,
    labels: Vec<(String, String)>,
}

impl MetricKey {
    fn new(name: impl Into<String>, labels: &[(&str, &str)]) -> Self {
        let mut sorted: Vec<(String, String)> = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));
        Self {
            name: name.into(),
            labels: sorted,
        }
    }
}

/// A current metric value, as exposed over the RPC surface.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricValue {
    pub name: String,
    pub labels: HashMap<String, String>,
    pub metric_type: String,
    pub value: f64,
}

/// Thread-safe in-memory metrics recorder.
///
/// State lives for the process lifetime only; the RPC surface exposes
/// point-in-time values.
pub struct MetricsRecorder {
    counters: RwLock<HashMap<MetricKey, Counter>>,
    gauges: RwLock<HashMap<MetricKey, Gauge>>,
    histograms: RwLock<HashMap<MetricKey, Histogram>>,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(HashMap::new()),
            gauges: RwLock::new(HashMap::new()),
            histograms: RwLock::new(HashMap::new()),
        }
    }

    /// Increment a counter by n.
    pub fn counter_inc(&self, name: &str, labels: &[(&str, &str)], n: u64) {
        let key = MetricKey::new(name, labels);
        let counters = self.counters.read();
        if let Some(c) = counters.get(&key) {
            c.increment(n);
            return;
        }
        drop(counters);
        let mut counters = self.counters.write();
        let c = counters.entry(key).or_insert_with(Counter::new);
        c.increment(n);
    }

    /// Set a gauge to a specific value.
    pub fn gauge_set(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let key = MetricKey::new(name, labels);
        let gauges = self.gauges.read();
        if let Some(g) = gauges.get(&key) {
            g.set(value);
            return;
        }
        drop(gauges);
        let mut gauges = self.gauges.write();
        let g = gauges.entry(key).or_insert_with(Gauge::new);
        g.set(value);
    }

    /// Increment/decrement a gauge by delta.
    pub fn gauge_inc(&self, name: &str, labels: &[(&str, &str)], delta: f64) {
        let key = MetricKey::new(name, labels);
        let gauges = self.gauges.read();
        if let Some(g) = gauges.get(&key) {
            g.increment(delta);
            return;
        }
        drop(gauges);
        let mut gauges = self.gauges.write();
        let g = gauges.entry(key).or_insert_with(Gauge::new);
        g.increment(delta);
    }

    /// Record a histogram observation.
    pub fn histogram_observe(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let key = MetricKey::new(name, labels);
        let histograms = self.histograms.read();
        if let Some(h) = histograms.get(&key) {
            h.observe(value);
            return;
        }
        drop(histograms);
        let mut histograms = self.histograms.write();
        let h = histograms.entry(key).or_insert_with(Histogram::new);
        h.observe(value);
    }

    /// Get a histogram summary.
    pub fn histogram_summary(&self, name: &str, labels: &[(&str, &str)]) -> HistogramSummary {
        let key = MetricKey::new(name, labels);
        let histograms = self.histograms.read();
        histograms
            .get(&key)
            .map(|h| h.summary())
            .unwrap_or_default()
    }

    /// Get current value of a counter.
    pub fn counter_get(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let key = MetricKey::new(name, labels);
        self.counters.read().get(&key).map_or(0, |c| c.get())
    }

    /// Get current value of a gauge.
    pub fn gauge_get(&self, name: &str, labels: &[(&str, &str)]) -> f64 {
        let key = MetricKey::new(name, labels);
        self.gauges.read().get(&key).map_or(0.0, |g| g.get())
    }

    /// Collect all current metric values (histograms report p50).
    pub fn collect(&self) -> Vec<MetricValue> {
        let mut out = Vec::new();

        let counters = self.counters.read();
        for (key, counter) in counters.iter() {
            out.push(metric_value(key, "counter", counter.get() as f64));
        }
        drop(counters);

        let gauges = self.gauges.read();
        for (key, gauge) in gauges.iter() {
            out.push(metric_value(key, "gauge", gauge.get()));
        }
        drop(gauges);

        let histograms = self.histograms.read();
        for (key, histogram) in histograms.iter() {
            out.push(metric_value(key, "histogram", histogram.summary().p50));
        }

        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }
}

fn metric_value(key: &MetricKey, metric_type: &str, value: f64) -> MetricValue {
    MetricValue {
        name: key.name.clone(),
        labels: key.labels.iter().cloned().collect(),
        metric_type: metric_type.to_string(),
        value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_increments() {
        let m = MetricsRecorder::new();
        m.counter_inc("tasks_submitted", &[], 1);
        m.counter_inc("tasks_submitted", &[], 2);
        assert_eq!(m.counter_get("tasks_submitted", &[]), 3);
    }

    #[test]
    fn counter_labels_are_distinct_series() {
        let m = MetricsRecorder::new();
        m.counter_inc("tasks_failed", &[("kind", "timeout")], 1);
        m.counter_inc("tasks_failed", &[("kind", "empty_artifact")], 2);
        assert_eq!(m.counter_get("tasks_failed", &[("kind", "timeout")]), 1);
        assert_eq!(m.counter_get("tasks_failed", &[("kind", "empty_artifact")]), 2);
        assert_eq!(m.counter_get("tasks_failed", &[]), 0);
    }

    #[test]
    fn gauge_set_and_inc() {
        let m = MetricsRecorder::new();
        m.gauge_set("tasks_in_flight", &[], 3.0);
        m.gauge_inc("tasks_in_flight", &[], -1.0);
        assert_eq!(m.gauge_get("tasks_in_flight", &[]), 2.0);
    }

    #[test]
    fn histogram_summary_percentiles() {
        let m = MetricsRecorder::new();
        for i in 1..=100 {
            m.histogram_observe("generation_seconds", &[], i as f64);
        }
        let summary = m.histogram_summary("generation_seconds", &[]);
        assert_eq!(summary.count, 100);
        assert!(summary.p50 >= 50.0 && summary.p50 <= 52.0);
        assert!(summary.p95 >= 95.0);
        assert!(summary.p99 >= 99.0);
    }

    #[test]
    fn empty_histogram_summary_is_zero() {
        let m = MetricsRecorder::new();
        let summary = m.histogram_summary("generation_seconds", &[]);
        assert_eq!(summary.count, 0);
        assert_eq!(summary.sum, 0.0);
    }

    #[test]
    fn collect_reports_all_series() {
        let m = MetricsRecorder::new();
        m.counter_inc("tasks_submitted", &[], 5);
        m.gauge_set("tasks_in_flight", &[], 1.0);
        m.histogram_observe("generation_seconds", &[], 2.5);

        let values = m.collect();
        assert_eq!(values.len(), 3);
        let names: Vec<&str> = values.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["generation_seconds", "tasks_in_flight", "tasks_submitted"]);
        let submitted = values.iter().find(|v| v.name == "tasks_submitted").unwrap();
        assert_eq!(submitted.value, 5.0);
        assert_eq!(submitted.metric_type, "counter");
    }
}
