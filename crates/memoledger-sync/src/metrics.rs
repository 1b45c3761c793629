use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, Counter, CounterVec, Encoder,
    Histogram, Opts, TextEncoder,
};

lazy_static! {
    // Cache metrics
    pub static ref MEMOS_APPENDED_TOTAL: CounterVec = register_counter_vec!(
        Opts::new("memoledger_memos_appended_total", "Memo records added to the cache"),
        &["source"]
    ).unwrap();

    pub static ref DUPLICATES_DROPPED_TOTAL: Counter = register_counter!(
        Opts::new("memoledger_duplicates_dropped_total", "Duplicate memo deliveries dropped")
    ).unwrap();

    pub static ref DECODE_ERRORS_TOTAL: CounterVec = register_counter_vec!(
        Opts::new("memoledger_decode_errors_total", "Ledger tuples rejected by the schema"),
        &["source"]
    ).unwrap();

    // Submission metrics
    pub static ref SUBMISSIONS_TOTAL: CounterVec = register_counter_vec!(
        Opts::new("memoledger_submissions_total", "Purchase submissions by outcome"),
        &["status"]
    ).unwrap();

    pub static ref CONFIRMATION_SECONDS: Histogram = register_histogram!(
        "memoledger_confirmation_seconds",
        "Time from broadcast to confirmation",
        vec![0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0]
    ).unwrap();
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
