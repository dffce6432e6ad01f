use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the global Prometheus recorder
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    init_metric_descriptions();

    Ok(handle)
}

/// Initialize metric descriptions (can be called multiple times safely)
fn init_metric_descriptions() {
    describe_counter!(
        "log_sage_admissions_total",
        "Analysis admission decisions by outcome"
    );
    describe_counter!(
        "log_sage_dispatch_total",
        "Completed analysis dispatches by status"
    );
    describe_histogram!(
        "log_sage_dispatch_duration_seconds",
        "Analysis round-trip duration in seconds"
    );
    describe_counter!(
        "log_sage_callback_failures_total",
        "Analysis callbacks that returned an error or panicked"
    );
    describe_counter!(
        "log_sage_throttle_evictions_total",
        "Expired throttle entries evicted from the registry"
    );
    describe_counter!(
        "log_sage_ingested_sessions_total",
        "Sessions submitted through the ingestion API"
    );
    describe_gauge!("log_sage_info", "Version and build information");

    gauge!("log_sage_info", "version" => env!("CARGO_PKG_VERSION")).set(1.0);
}

/// Record an admission decision: `admitted`, `throttled`, `no_credential`
/// or `already_dispatched`
pub fn record_admission(outcome: &'static str) {
    counter!("log_sage_admissions_total", "outcome" => outcome).increment(1);
}

/// Record a finished dispatch
pub fn record_dispatch(status: &'static str, duration: Duration) {
    counter!("log_sage_dispatch_total", "status" => status).increment(1);
    histogram!("log_sage_dispatch_duration_seconds", "status" => status)
        .record(duration.as_secs_f64());
}

pub fn record_callback_failure(reason: &'static str) {
    counter!("log_sage_callback_failures_total", "reason" => reason).increment(1);
}

pub fn record_throttle_evictions(count: usize) {
    counter!("log_sage_throttle_evictions_total").increment(count as u64);
}

pub fn record_ingested_session(dispatched: bool) {
    counter!(
        "log_sage_ingested_sessions_total",
        "dispatched" => if dispatched { "true" } else { "false" },
    )
    .increment(1);
}
