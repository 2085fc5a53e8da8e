//! Prometheus counters for memory operations, adapter calls and insights.
//! Recording is a no-op until `init_metrics` has run.

use lazy_static::lazy_static;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Registry, TextEncoder};
use std::sync::OnceLock;

lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
}

static MEMORY_OPS: OnceLock<IntCounterVec> = OnceLock::new();
static ADAPTER_CALLS: OnceLock<IntCounterVec> = OnceLock::new();
static INSIGHTS_CREATED: OnceLock<IntCounter> = OnceLock::new();
static MIRROR_FAILURES: OnceLock<IntCounter> = OnceLock::new();
static RECALL_DURATION: OnceLock<Histogram> = OnceLock::new();

pub fn init_metrics() {
    if let Ok(counter) = IntCounterVec::new(
        prometheus::opts!("memory_operations_total", "Memory operations by outcome"),
        &["operation", "status"],
    ) {
        if MEMORY_OPS.set(counter.clone()).is_ok() {
            REGISTRY.register(Box::new(counter)).ok();
        }
    }

    if let Ok(counter) = IntCounterVec::new(
        prometheus::opts!("adapter_calls_total", "Backend adapter calls by outcome"),
        &["adapter", "call", "outcome"],
    ) {
        if ADAPTER_CALLS.set(counter.clone()).is_ok() {
            REGISTRY.register(Box::new(counter)).ok();
        }
    }

    if let Ok(counter) = IntCounter::new("insights_created_total", "Insights persisted by the insight engine") {
        if INSIGHTS_CREATED.set(counter.clone()).is_ok() {
            REGISTRY.register(Box::new(counter)).ok();
        }
    }

    if let Ok(counter) = IntCounter::new("graph_mirror_failures_total", "Edges the graph mirror failed to write") {
        if MIRROR_FAILURES.set(counter.clone()).is_ok() {
            REGISTRY.register(Box::new(counter)).ok();
        }
    }

    if let Ok(histogram) = Histogram::with_opts(
        HistogramOpts::new("recall_duration_seconds", "End-to-end recall latency")
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
    ) {
        if RECALL_DURATION.set(histogram.clone()).is_ok() {
            REGISTRY.register(Box::new(histogram)).ok();
        }
    }
}

pub fn inc_memory_op(operation: &str, status: &str) {
    if let Some(counter) = MEMORY_OPS.get() {
        counter.with_label_values(&[operation, status]).inc();
    }
}

pub fn inc_adapter_call(adapter: &str, call: &str, outcome: &str) {
    if let Some(counter) = ADAPTER_CALLS.get() {
        counter.with_label_values(&[adapter, call, outcome]).inc();
    }
}

pub fn inc_insights_created(n: u64) {
    if let Some(counter) = INSIGHTS_CREATED.get() {
        counter.inc_by(n);
    }
}

pub fn inc_mirror_failures() {
    if let Some(counter) = MIRROR_FAILURES.get() {
        counter.inc();
    }
}

pub fn observe_recall(seconds: f64) {
    if let Some(histogram) = RECALL_DURATION.get() {
        histogram.observe(seconds);
    }
}

/// Text exposition of every registered metric.
pub fn render() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

#[cfg(feature = "cli")]
pub async fn get_metrics() -> impl axum::response::IntoResponse {
    use axum::http::StatusCode;

    match render() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain")],
            format!("failed to encode metrics: {}", e),
        ),
    }
}
