//! Prometheus metrics for the warden
//!
//! Registered in the default registry; [`render`] produces the text exposition
//! written by `--metrics-file`.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};

lazy_static! {
    // Scanning
    pub static ref LOGS: CounterVec = register_counter_vec!(
        "warden_logs_total",
        "Raw logs retrieved, by decode outcome",
        &["chain", "outcome"]
    ).unwrap();

    pub static ref SCAN_QUERIES: CounterVec = register_counter_vec!(
        "warden_scan_queries_total",
        "Log queries issued, by ladder tier and result",
        &["chain", "tier", "status"]
    ).unwrap();

    pub static ref UNITS_SKIPPED: CounterVec = register_counter_vec!(
        "warden_scan_units_skipped_total",
        "Block units that failed at the deepest tier",
        &["chain"]
    ).unwrap();

    pub static ref LAST_SCANNED_BLOCK: GaugeVec = register_gauge_vec!(
        "warden_last_scanned_block",
        "Upper bound of the last scanned window",
        &["chain"]
    ).unwrap();

    pub static ref EVENTS_DETECTED: CounterVec = register_counter_vec!(
        "warden_events_detected_total",
        "Bridge events detected",
        &["chain", "event"]
    ).unwrap();

    // Relaying
    pub static ref RELAYS: CounterVec = register_counter_vec!(
        "warden_relays_total",
        "Relay submissions, by function and outcome",
        &["chain", "function", "status"]
    ).unwrap();

    pub static ref RELAY_LATENCY: HistogramVec = register_histogram_vec!(
        "warden_relay_latency_seconds",
        "Time from nonce read to confirmed receipt",
        &["chain"],
        vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0]
    ).unwrap();

    // Passes
    pub static ref PASSES: CounterVec = register_counter_vec!(
        "warden_passes_total",
        "Relay passes, by direction and result",
        &["direction", "status"]
    ).unwrap();

    pub static ref LAST_PASS: GaugeVec = register_gauge_vec!(
        "warden_last_pass_timestamp",
        "Unix timestamp of the last completed pass",
        &["direction"]
    ).unwrap();
}

/// Record decode outcomes for one scan
pub fn record_logs(chain: &str, kept: usize, dropped: usize) {
    LOGS.with_label_values(&[chain, "kept"]).inc_by(kept as f64);
    LOGS.with_label_values(&[chain, "dropped"])
        .inc_by(dropped as f64);
}

/// Record a single log query
pub fn record_scan_query(chain: &str, tier: &str, status: &str) {
    SCAN_QUERIES.with_label_values(&[chain, tier, status]).inc();
}

pub fn record_units_skipped(chain: &str, count: usize) {
    UNITS_SKIPPED
        .with_label_values(&[chain])
        .inc_by(count as f64);
}

pub fn set_last_scanned_block(chain: &str, block: u64) {
    LAST_SCANNED_BLOCK
        .with_label_values(&[chain])
        .set(block as f64);
}

pub fn record_event_detected(chain: &str, event: &str) {
    EVENTS_DETECTED.with_label_values(&[chain, event]).inc();
}

/// Record a relay outcome; `status` is "confirmed" or the failing stage
pub fn record_relay(chain: &str, function: &str, status: &str) {
    RELAYS.with_label_values(&[chain, function, status]).inc();
}

pub fn record_relay_latency(chain: &str, seconds: f64) {
    RELAY_LATENCY.with_label_values(&[chain]).observe(seconds);
}

/// Record the end of a pass
pub fn record_pass(direction: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    PASSES.with_label_values(&[direction, status]).inc();
    if success {
        LAST_PASS
            .with_label_values(&[direction])
            .set(chrono::Utc::now().timestamp() as f64);
    }
}

/// Text exposition of every registered metric
pub fn render() -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
