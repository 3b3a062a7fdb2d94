//! Operation metrics
//!
//! The coordinator reports through the [`MetricsSink`] trait. Every method is
//! fire-and-forget: recording never blocks on I/O and never fails the calling
//! operation. [`ClusterMetrics`] is the in-process implementation backing the
//! status endpoint and the Prometheus export.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crate::common::utils::{duration_ms, read_lock, write_lock};

/// Histogram bucket boundaries for latency measurements (in milliseconds)
const LATENCY_BUCKETS: [f64; 11] = [
    1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0,
];

/// Receiver of coordinator counters and timers
pub trait MetricsSink: Send + Sync {
    fn record_read(&self, latency: Duration);
    fn record_write(&self, latency: Duration);
    fn record_delete(&self);
    fn record_failed(&self);
    fn record_node_added(&self);
    fn record_node_removed(&self);
    fn record_unit_operation(&self, node_id: &str);
}

/// A simple histogram implementation for latency tracking
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<AtomicU64>,
    boundaries: Vec<f64>,
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    /// Create a new histogram with default latency buckets
    pub fn new() -> Self {
        Self::with_buckets(&LATENCY_BUCKETS)
    }

    /// Create a histogram with custom bucket boundaries
    pub fn with_buckets(boundaries: &[f64]) -> Self {
        let buckets = (0..=boundaries.len()).map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            boundaries: boundaries.to_vec(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Record a value in the histogram
    pub fn observe(&self, value: f64) {
        let bucket_idx = self
            .boundaries
            .iter()
            .position(|&boundary| value <= boundary)
            .unwrap_or(self.boundaries.len());

        self.buckets[bucket_idx].fetch_add(1, Ordering::Relaxed);
        // Stored as microseconds for precision
        self.sum
            .fetch_add((value * 1000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Cumulative bucket counts, ending with the +Inf bucket
    pub fn get_buckets(&self) -> Vec<(f64, u64)> {
        let mut cumulative = 0u64;
        let mut result = Vec::with_capacity(self.boundaries.len() + 1);

        for (i, &boundary) in self.boundaries.iter().enumerate() {
            cumulative += self.buckets[i].load(Ordering::Relaxed);
            result.push((boundary, cumulative));
        }

        cumulative += self.buckets[self.boundaries.len()].load(Ordering::Relaxed);
        result.push((f64::INFINITY, cumulative));

        result
    }

    /// Get sum of all observed values
    pub fn sum(&self) -> f64 {
        self.sum.load(Ordering::Relaxed) as f64 / 1000.0
    }

    /// Get count of observations
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Mean of observed values, 0 when empty
    pub fn mean(&self) -> f64 {
        match self.count() {
            0 => 0.0,
            n => self.sum() / n as f64,
        }
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Monotonic counter
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Point-in-time copy of the cluster counters
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub read_operations: u64,
    pub write_operations: u64,
    pub delete_operations: u64,
    pub failed_operations: u64,
    pub nodes_added: u64,
    pub nodes_removed: u64,
    pub average_read_latency_ms: f64,
    pub average_write_latency_ms: f64,
    pub node_operations: BTreeMap<String, u64>,
    pub uptime_seconds: u64,
}

impl MetricsSnapshot {
    /// Reads + writes + deletes
    pub fn total_operations(&self) -> u64 {
        self.read_operations + self.write_operations + self.delete_operations
    }
}

/// In-process metrics registry for one coordinator
#[derive(Debug)]
pub struct ClusterMetrics {
    pub reads: Counter,
    pub writes: Counter,
    pub deletes: Counter,
    pub failures: Counter,
    pub nodes_added: Counter,
    pub nodes_removed: Counter,
    pub read_latency: Histogram,
    pub write_latency: Histogram,

    /// Per storage unit operation tallies
    node_operations: RwLock<HashMap<String, Arc<Counter>>>,

    /// Start time for uptime calculation
    start_time: Instant,
}

impl ClusterMetrics {
    pub fn new() -> Self {
        Self {
            reads: Counter::new(),
            writes: Counter::new(),
            deletes: Counter::new(),
            failures: Counter::new(),
            nodes_added: Counter::new(),
            nodes_removed: Counter::new(),
            read_latency: Histogram::new(),
            write_latency: Histogram::new(),
            node_operations: RwLock::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    /// Get or create the counter for a storage unit
    fn node_counter(&self, node_id: &str) -> Arc<Counter> {
        if let Some(counter) = read_lock(self.node_operations.read()).get(node_id) {
            return counter.clone();
        }
        write_lock(self.node_operations.write())
            .entry(node_id.to_string())
            .or_insert_with(|| Arc::new(Counter::new()))
            .clone()
    }

    pub fn node_operations(&self) -> BTreeMap<String, u64> {
        read_lock(self.node_operations.read())
            .iter()
            .map(|(id, counter)| (id.clone(), counter.get()))
            .collect()
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            read_operations: self.reads.get(),
            write_operations: self.writes.get(),
            delete_operations: self.deletes.get(),
            failed_operations: self.failures.get(),
            nodes_added: self.nodes_added.get(),
            nodes_removed: self.nodes_removed.get(),
            average_read_latency_ms: self.read_latency.mean(),
            average_write_latency_ms: self.write_latency.mean(),
            node_operations: self.node_operations(),
            uptime_seconds: self.uptime_seconds(),
        }
    }

    /// Generate Prometheus-compatible metrics output
    pub fn to_prometheus(&self) -> String {
        use std::fmt::Write;
        let mut out = String::new();

        let counters = [
            ("ringkv_reads_total", "Total read operations", self.reads.get()),
            ("ringkv_writes_total", "Total write operations", self.writes.get()),
            ("ringkv_deletes_total", "Total delete operations", self.deletes.get()),
            ("ringkv_failed_total", "Total failed operations", self.failures.get()),
            ("ringkv_nodes_added_total", "Storage units added", self.nodes_added.get()),
            ("ringkv_nodes_removed_total", "Storage units removed", self.nodes_removed.get()),
        ];
        for (name, help, value) in counters {
            let _ = writeln!(out, "# HELP {} {}", name, help);
            let _ = writeln!(out, "# TYPE {} counter", name);
            let _ = writeln!(out, "{} {}", name, value);
        }

        out.push_str("# HELP ringkv_node_operations_total Operations per storage unit\n");
        out.push_str("# TYPE ringkv_node_operations_total counter\n");
        for (node_id, count) in self.node_operations() {
            let _ = writeln!(
                out,
                "ringkv_node_operations_total{{node_id=\"{}\"}} {}",
                node_id, count
            );
        }

        for (name, hist) in [
            ("ringkv_read_duration_ms", &self.read_latency),
            ("ringkv_write_duration_ms", &self.write_latency),
        ] {
            let _ = writeln!(out, "# TYPE {} histogram", name);
            for (le, count) in hist.get_buckets() {
                if le.is_infinite() {
                    let _ = writeln!(out, "{}_bucket{{le=\"+Inf\"}} {}", name, count);
                } else {
                    let _ = writeln!(out, "{}_bucket{{le=\"{}\"}} {}", name, le, count);
                }
            }
            let _ = writeln!(out, "{}_sum {}", name, hist.sum());
            let _ = writeln!(out, "{}_count {}", name, hist.count());
        }

        out.push_str("# TYPE ringkv_uptime_seconds gauge\n");
        let _ = writeln!(out, "ringkv_uptime_seconds {}", self.uptime_seconds());

        out
    }
}

impl Default for ClusterMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSink for ClusterMetrics {
    fn record_read(&self, latency: Duration) {
        self.reads.inc();
        self.read_latency.observe(duration_ms(latency));
    }

    fn record_write(&self, latency: Duration) {
        self.writes.inc();
        self.write_latency.observe(duration_ms(latency));
    }

    fn record_delete(&self) {
        self.deletes.inc();
    }

    fn record_failed(&self) {
        self.failures.inc();
    }

    fn record_node_added(&self) {
        self.nodes_added.inc();
    }

    fn record_node_removed(&self) {
        self.nodes_removed.inc();
    }

    fn record_unit_operation(&self, node_id: &str) {
        self.node_counter(node_id).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram() {
        let hist = Histogram::new();

        hist.observe(5.0);
        hist.observe(50.0);
        hist.observe(500.0);

        assert_eq!(hist.count(), 3);
        assert!((hist.mean() - 185.0).abs() < 1e-6);

        let buckets = hist.get_buckets();
        assert_eq!(buckets.len(), LATENCY_BUCKETS.len() + 1);
        assert_eq!(buckets.last().unwrap().1, 3);
    }

    #[test]
    fn test_histogram_empty_mean() {
        assert_eq!(Histogram::new().mean(), 0.0);
    }

    #[test]
    fn test_counter() {
        let counter = Counter::new();

        assert_eq!(counter.get(), 0);
        counter.inc();
        counter.inc();
        assert_eq!(counter.get(), 2);
    }

    #[test]
    fn test_cluster_metrics_snapshot() {
        let metrics = ClusterMetrics::new();

        metrics.record_write(Duration::from_millis(4));
        metrics.record_write(Duration::from_millis(6));
        metrics.record_read(Duration::from_millis(2));
        metrics.record_delete();
        metrics.record_failed();
        metrics.record_unit_operation("n1");
        metrics.record_unit_operation("n1");
        metrics.record_unit_operation("n2");

        let snap = metrics.snapshot();
        assert_eq!(snap.write_operations, 2);
        assert_eq!(snap.read_operations, 1);
        assert_eq!(snap.total_operations(), 4);
        assert_eq!(snap.failed_operations, 1);
        assert!((snap.average_write_latency_ms - 5.0).abs() < 1e-6);
        assert_eq!(snap.node_operations.get("n1"), Some(&2));
        assert_eq!(snap.node_operations.get("n2"), Some(&1));
    }

    #[test]
    fn test_prometheus_output() {
        let metrics = ClusterMetrics::new();
        metrics.record_node_added();
        metrics.record_unit_operation("n1");

        let out = metrics.to_prometheus();
        assert!(out.contains("ringkv_nodes_added_total 1"));
        assert!(out.contains("ringkv_node_operations_total{node_id=\"n1\"} 1"));
        assert!(out.contains("ringkv_write_duration_ms_bucket{le=\"+Inf\"} 0"));
    }
}
