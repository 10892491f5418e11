//! Observability: Distributed Tracing, Metrics, and Logging.

pub mod metrics;

use opentelemetry_otlp::WithExportConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Initialize the observability stack.
pub fn init(service_name: &str, config: &ObservabilityConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    // Set up OpenTelemetry tracing if endpoint is provided
    let telemetry_layer = match config.otlp_endpoint.as_deref() {
        Some(endpoint) => {
            let tracer = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(
                    opentelemetry_otlp::new_exporter()
                        .tonic()
                        .with_endpoint(endpoint),
                )
                .with_trace_config(
                    opentelemetry_sdk::trace::config().with_resource(
                        opentelemetry_sdk::Resource::new(vec![opentelemetry::KeyValue::new(
                            "service.name",
                            service_name.to_string(),
                        )]),
                    ),
                )
                .install_batch(opentelemetry_sdk::runtime::Tokio)?;
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    let json_layer = config
        .json_logging
        .then(|| tracing_subscriber::fmt::layer().json());
    let pretty_layer = (!config.json_logging).then(tracing_subscriber::fmt::layer);

    tracing_subscriber::registry()
        .with(filter)
        .with(telemetry_layer)
        .with(json_layer)
        .with(pretty_layer)
        .try_init()?;

    Ok(())
}

/// Shutdown OpenTelemetry.
pub fn shutdown() {
    opentelemetry::global::shutdown_tracer_provider();
}

/// Structured event types for logging.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "event_type")]
pub enum GuardEvent {
    FailureRecorded {
        error: String,
        error_type: String,
    },
    CircuitOpened {
        error: String,
        error_type: String,
    },
    CircuitClosed,
    JobsPaused {
        count: u64,
        reason: String,
    },
    JobResumed {
        job_id: String,
        task_handle: String,
        attempts: u32,
    },
    JobResumeFailed {
        job_id: String,
        reason: String,
    },
    ResumeCompleted {
        resumed: usize,
        failed: usize,
        duration_ms: u64,
    },
}

impl GuardEvent {
    /// Log this event.
    pub fn log(&self) {
        match self {
            GuardEvent::FailureRecorded { error, error_type } => {
                tracing::warn!(
                    error = %error,
                    error_type = %error_type,
                    "Dependency failure recorded"
                );
            }
            GuardEvent::CircuitOpened { error, error_type } => {
                tracing::error!(
                    error = %error,
                    error_type = %error_type,
                    "Circuit breaker opened; pipeline halted"
                );
            }
            GuardEvent::CircuitClosed => {
                tracing::info!("Circuit breaker manually closed");
            }
            GuardEvent::JobsPaused { count, reason } => {
                tracing::warn!(
                    count = %count,
                    reason = %reason,
                    "Active jobs paused"
                );
            }
            GuardEvent::JobResumed {
                job_id,
                task_handle,
                attempts,
            } => {
                tracing::info!(
                    job_id = %job_id,
                    task_handle = %task_handle,
                    attempts = %attempts,
                    "Job resumed"
                );
            }
            GuardEvent::JobResumeFailed { job_id, reason } => {
                tracing::warn!(
                    job_id = %job_id,
                    reason = %reason,
                    "Job resume failed"
                );
            }
            GuardEvent::ResumeCompleted {
                resumed,
                failed,
                duration_ms,
            } => {
                tracing::info!(
                    resumed = %resumed,
                    failed = %failed,
                    duration_ms = %duration_ms,
                    "Resume cascade completed"
                );
            }
        }
    }
}
