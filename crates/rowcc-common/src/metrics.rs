//! Light ambient instrumentation for the row-lock hot path.
//!
//! A full statistics subsystem is out of scope here; this module is
//! deliberately thin — a handful of counters and a latency timer, not a
//! metrics engine.

use metrics::{counter, histogram};
use std::time::Instant;

pub fn record_commit(aborted: bool) {
    let status = if aborted { "abort" } else { "commit" };
    counter!("rowcc_transactions_total", "status" => status).increment(1);
}

pub fn record_wound() {
    counter!("rowcc_wounds_total").increment(1);
}

pub fn record_commit_latency_us(latency_us: f64) {
    histogram!("rowcc_commit_latency_us").record(latency_us);
}

/// Export metrics in the Prometheus text exposition format.
#[must_use]
pub fn export_prometheus() -> String {
    use prometheus::{Encoder, TextEncoder};
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!("failed to encode prometheus metrics: {e}");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Drop-guard latency timer: records elapsed microseconds to `on_drop`
/// when it goes out of scope.
pub struct LatencyTimer {
    start: Instant,
    on_drop: fn(f64),
}

impl LatencyTimer {
    #[must_use]
    pub fn new(on_drop: fn(f64)) -> Self {
        Self {
            start: Instant::now(),
            on_drop,
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        (self.on_drop)(self.start.elapsed().as_secs_f64() * 1_000_000.0);
    }
}
