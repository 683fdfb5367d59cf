//! Prometheus metrics for backoffice-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "backoffice_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Document counter by kind.
pub static DOCUMENTS_CREATED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "backoffice_documents_created_total",
        "Total number of documents created by kind",
        &["kind"] // quote, invoice, certificate
    )
    .expect("Failed to register documents_created")
});

/// Quote conversion counter by outcome.
pub static QUOTE_CONVERSIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "backoffice_quote_conversions_total",
        "Total number of quote to invoice conversions by outcome",
        &["outcome"] // converted, refused
    )
    .expect("Failed to register quote_conversions")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&DOCUMENTS_CREATED);
    Lazy::force(&QUOTE_CONVERSIONS);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
