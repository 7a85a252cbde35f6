//! Prometheus metrics for the meter service

use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram,
    Counter, CounterVec, Encoder, Gauge, Histogram, TextEncoder,
};

// ── Session metrics ──────────────────────────────────────────────────────────

pub static SESSIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "jouletrace_sessions_total",
        "Sessions handled, by outcome",
        &["outcome"]
    )
    .unwrap()
});

pub static ACTIVE_SESSIONS: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "jouletrace_active_sessions",
        "Sessions currently between start and end"
    )
    .unwrap()
});

pub static SESSION_DURATION: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "jouletrace_session_duration_seconds",
        "Session length by client timestamps",
        vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 1800.0, 7200.0]
    )
    .unwrap()
});

// ── Tag metrics ──────────────────────────────────────────────────────────────

pub static TAGS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!("jouletrace_tags_total", "Tags recorded across all sessions").unwrap()
});

pub static TAG_FAILURES: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "jouletrace_tag_failures_total",
        "Tags the backend failed to record"
    )
    .unwrap()
});

// ── Protocol metrics ─────────────────────────────────────────────────────────

pub static PROTOCOL_ERRORS: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "jouletrace_protocol_errors_total",
        "Connections dropped for malformed or out-of-sequence messages"
    )
    .unwrap()
});

// ── Acquisition metrics ──────────────────────────────────────────────────────

pub static DAQ_WINDOWS: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "jouletrace_daq_windows_total",
        "Sample windows averaged into power records"
    )
    .unwrap()
});

/// Render all registered metrics to Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}
