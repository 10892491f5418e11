//! Metrics registry and helpers.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

use crate::breaker::CircuitState;

pub const BREAKER_TRANSITIONS: &str = "leadguard_breaker_transitions_total";
pub const BREAKER_OPEN: &str = "leadguard_breaker_open";
pub const DEPENDENCY_FAILURES: &str = "leadguard_dependency_failures_total";
pub const DEPENDENCY_SUCCESSES: &str = "leadguard_dependency_successes_total";
pub const REQUESTS_BLOCKED: &str = "leadguard_requests_blocked_total";
pub const JOBS_PAUSED: &str = "leadguard_jobs_paused_total";
pub const JOBS_RESUMED: &str = "leadguard_jobs_resumed_total";
pub const JOBS_RESUME_FAILED: &str = "leadguard_jobs_resume_failed_total";
pub const RESUME_DURATION: &str = "leadguard_resume_duration_seconds";

const RESUME_DURATION_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

/// Install the Prometheus recorder. The handle renders `GET /metrics`.
pub fn install_prometheus() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(RESUME_DURATION.to_string()),
            RESUME_DURATION_BUCKETS,
        )?
        .install_recorder()?;
    register_metrics();
    Ok(handle)
}

/// Register all metric descriptions.
pub fn register_metrics() {
    // Counters
    describe_counter!(
        BREAKER_TRANSITIONS,
        "Circuit breaker state transitions, labelled by target state"
    );
    describe_counter!(
        DEPENDENCY_FAILURES,
        "Dependency failures reported to the breaker"
    );
    describe_counter!(
        DEPENDENCY_SUCCESSES,
        "Dependency successes reported to the breaker"
    );
    describe_counter!(
        REQUESTS_BLOCKED,
        "Requests refused because the breaker was open or unreadable"
    );
    describe_counter!(JOBS_PAUSED, "Jobs moved to PAUSED when the breaker opened");
    describe_counter!(JOBS_RESUMED, "Paused jobs successfully re-dispatched");
    describe_counter!(
        JOBS_RESUME_FAILED,
        "Paused jobs that could not be re-dispatched"
    );

    // Gauges
    describe_gauge!(BREAKER_OPEN, "1 while the global breaker is open, 0 while closed");

    // Histograms
    describe_histogram!(
        RESUME_DURATION,
        "Wall-clock duration of one resume cascade in seconds"
    );
}

/// Record a breaker transition and update the open gauge.
pub fn record_transition(to: CircuitState) {
    counter!(BREAKER_TRANSITIONS, "to" => to.as_str()).increment(1);
    set_breaker_state(to);
}

/// Mirror the observed breaker state into the gauge.
pub fn set_breaker_state(state: CircuitState) {
    let value = match state {
        CircuitState::Open => 1.0,
        CircuitState::Closed => 0.0,
    };
    gauge!(BREAKER_OPEN).set(value);
}

pub fn record_dependency_failure(error_type: &str) {
    counter!(DEPENDENCY_FAILURES, "error_type" => error_type.to_string()).increment(1);
}

pub fn record_dependency_success() {
    counter!(DEPENDENCY_SUCCESSES).increment(1);
}

pub fn record_request_blocked() {
    counter!(REQUESTS_BLOCKED).increment(1);
}

pub fn record_jobs_paused(count: u64) {
    counter!(JOBS_PAUSED).increment(count);
}

pub fn record_job_resumed() {
    counter!(JOBS_RESUMED).increment(1);
}

pub fn record_job_resume_failed() {
    counter!(JOBS_RESUME_FAILED).increment(1);
}

pub fn record_resume_duration(duration_secs: f64) {
    histogram!(RESUME_DURATION).record(duration_secs);
}
