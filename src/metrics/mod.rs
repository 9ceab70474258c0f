/*!
 * # Metrics Module
 *
 * In-process counters and histograms for the order pipeline, exported in
 * Prometheus text format at `/metrics` and as JSON at `/metrics/json`.
 */

use dashmap::DashMap;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub const ORDERS_CREATED: &str = "orders_created_total";
pub const CHECKOUT_INSUFFICIENT_STOCK: &str = "checkout_insufficient_stock_total";
pub const WEBHOOK_REPLAYS: &str = "webhook_replays_total";
pub const WEBHOOK_SIGNATURE_FAILURES: &str = "webhook_signature_failures_total";
pub const ORDER_STATUS_TRANSITIONS: &str = "order_status_transitions_total";
pub const ORDER_CREATION_SECONDS: &str = "order_creation_seconds";

#[derive(Debug, Clone, Default)]
pub struct Counter {
    value: Arc<AtomicU64>,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, value: u64) {
        self.value.fetch_add(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Count/sum histogram. The sum is kept in microseconds-equivalent units
/// (value * 1e6) so sub-second observations are not truncated.
#[derive(Debug, Clone, Default)]
pub struct Histogram {
    sum_micros: Arc<AtomicU64>,
    count: Arc<AtomicU64>,
}

impl Histogram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&self, value: f64) {
        if !value.is_finite() || value < 0.0 {
            return;
        }
        self.sum_micros
            .fetch_add((value * 1_000_000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn get_sum(&self) -> f64 {
        self.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }
}

#[derive(Debug, Default)]
pub struct MetricsRegistry {
    counters: DashMap<String, Counter>,
    histograms: DashMap<String, Histogram>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create_counter(&self, name: &str) -> Counter {
        self.counters
            .entry(name.to_string())
            .or_insert_with(Counter::new)
            .clone()
    }

    pub fn get_or_create_histogram(&self, name: &str) -> Histogram {
        self.histograms
            .entry(name.to_string())
            .or_insert_with(Histogram::new)
            .clone()
    }

    pub fn export_metrics(&self) -> String {
        let mut counters: Vec<(String, u64)> = self
            .counters
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().get()))
            .collect();
        counters.sort();

        let mut histograms: Vec<(String, u64, f64)> = self
            .histograms
            .iter()
            .map(|entry| {
                let h = entry.value();
                (entry.key().clone(), h.get_count(), h.get_sum())
            })
            .collect();
        histograms.sort_by(|a, b| a.0.cmp(&b.0));

        let mut output = String::new();
        for (name, value) in counters {
            output.push_str(&format!("# TYPE {} counter\n", name));
            output.push_str(&format!("{} {}\n", name, value));
        }
        for (name, count, sum) in histograms {
            output.push_str(&format!("# TYPE {} histogram\n", name));
            output.push_str(&format!("{}_count {}\n", name, count));
            output.push_str(&format!("{}_sum {}\n", name, sum));
        }
        output
    }

    pub fn export_metrics_json(&self) -> serde_json::Value {
        let mut counters = serde_json::Map::new();
        for entry in self.counters.iter() {
            counters.insert(entry.key().clone(), json!(entry.value().get()));
        }

        let mut histograms = serde_json::Map::new();
        for entry in self.histograms.iter() {
            histograms.insert(
                entry.key().clone(),
                json!({
                    "count": entry.value().get_count(),
                    "sum": entry.value().get_sum(),
                }),
            );
        }

        json!({
            "counters": counters,
            "histograms": histograms,
        })
    }
}

// Global metrics registry
lazy_static::lazy_static! {
    pub static ref METRICS: MetricsRegistry = MetricsRegistry::new();
}

pub fn increment_counter(name: &str) {
    METRICS.get_or_create_counter(name).inc();
}

pub fn observe_histogram(name: &str, value: f64) {
    METRICS.get_or_create_histogram(name).observe(value);
}
