// Metrics module for Prometheus observability

mod registry;

pub use registry::{
    gather_metrics, BACKEND_CALLS, BACKEND_DURATION, CREDENTIAL_EXPIRY, CREDENTIAL_REFRESHES,
    REQUESTS_TOTAL, REQUEST_DURATION, SSE_CONNECTIONS, SSE_EVENTS, TRANSLATION_ERRORS,
};

/// Helper to record request metrics
pub fn record_request(protocol: &str, status_code: u16, model: &str, streaming: bool, duration_secs: f64) {
    let status = status_code.to_string();
    REQUESTS_TOTAL
        .with_label_values(&[protocol, &status, model, if streaming { "true" } else { "false" }])
        .inc();

    REQUEST_DURATION
        .with_label_values(&[protocol, &status])
        .observe(duration_secs);
}

/// Helper to record Kiro backend call metrics
pub fn record_backend_call(model: &str, status_code: u16, duration_secs: f64) {
    BACKEND_CALLS
        .with_label_values(&[model, &status_code.to_string()])
        .inc();

    BACKEND_DURATION
        .with_label_values(&[model])
        .observe(duration_secs);
}

pub fn record_credential_refresh(success: bool) {
    let status = if success { "success" } else { "failure" };
    CREDENTIAL_REFRESHES.with_label_values(&[status]).inc();
}

pub fn update_credential_expiry(seconds: i64) {
    CREDENTIAL_EXPIRY.set(seconds as f64);
}

pub fn record_sse_event(protocol: &str, event_type: &str) {
    SSE_EVENTS.with_label_values(&[protocol, event_type]).inc();
}

pub fn record_sse_connection(status: &str) {
    SSE_CONNECTIONS.with_label_values(&[status]).inc();
}

pub fn record_translation_error(protocol: &str) {
    TRANSLATION_ERRORS.with_label_values(&[protocol]).inc();
}
