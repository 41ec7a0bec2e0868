// Prometheus metrics registry and collectors

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec_with_registry, register_gauge_with_registry,
    register_histogram_vec_with_registry, CounterVec, Encoder, Gauge, HistogramVec, Opts,
    Registry, TextEncoder,
};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // ============================================================================
    // REQUEST METRICS
    // ============================================================================

    /// Total number of API requests
    pub static ref REQUESTS_TOTAL: CounterVec = register_counter_vec_with_registry!(
        Opts::new("kiro_proxy_requests_total", "Total number of API requests"),
        &["protocol", "status_code", "model", "streaming"],
        REGISTRY
    ).unwrap();

    /// Time until the response head is ready
    pub static ref REQUEST_DURATION: HistogramVec = register_histogram_vec_with_registry!(
        prometheus::HistogramOpts::new("kiro_proxy_request_duration_seconds", "Time to response headers in seconds")
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        &["protocol", "status_code"],
        REGISTRY
    ).unwrap();

    // ============================================================================
    // BACKEND METRICS
    // ============================================================================

    pub static ref BACKEND_CALLS: CounterVec = register_counter_vec_with_registry!(
        Opts::new("kiro_proxy_backend_calls_total", "Total Kiro backend calls"),
        &["model", "status_code"],
        REGISTRY
    ).unwrap();

    /// Time until the backend answered with a status line
    pub static ref BACKEND_DURATION: HistogramVec = register_histogram_vec_with_registry!(
        prometheus::HistogramOpts::new("kiro_proxy_backend_duration_seconds", "Kiro backend time to first byte")
            .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        &["model"],
        REGISTRY
    ).unwrap();

    // ============================================================================
    // CREDENTIAL METRICS
    // ============================================================================

    pub static ref CREDENTIAL_REFRESHES: CounterVec = register_counter_vec_with_registry!(
        Opts::new("kiro_proxy_credential_refreshes_total", "Total Kiro token refreshes"),
        &["status"], // success, failure
        REGISTRY
    ).unwrap();

    pub static ref CREDENTIAL_EXPIRY: Gauge = register_gauge_with_registry!(
        Opts::new("kiro_proxy_credential_expiry_seconds", "Seconds until the Kiro access token expires"),
        REGISTRY
    ).unwrap();

    // ============================================================================
    // STREAMING METRICS
    // ============================================================================

    pub static ref SSE_EVENTS: CounterVec = register_counter_vec_with_registry!(
        Opts::new("kiro_proxy_sse_events_total", "Total SSE frames sent"),
        &["protocol", "event_type"],
        REGISTRY
    ).unwrap();

    pub static ref SSE_CONNECTIONS: CounterVec = register_counter_vec_with_registry!(
        Opts::new("kiro_proxy_sse_connections_total", "Total SSE connections"),
        &["status"], // opened, completed, error
        REGISTRY
    ).unwrap();

    // ============================================================================
    // TRANSLATION METRICS
    // ============================================================================

    pub static ref TRANSLATION_ERRORS: CounterVec = register_counter_vec_with_registry!(
        Opts::new("kiro_proxy_translation_errors_total", "Requests rejected during translation"),
        &["protocol"],
        REGISTRY
    ).unwrap();
}

/// Gather all metrics and return as Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_default()
}
