//! HTTP API for the pipeline guard.
//!
//! - `GET /health`, `GET /health/ready`, `GET /metrics` (unversioned)
//! - `GET /api/v1/circuit-breaker` status read
//! - `POST /api/v1/circuit-breaker/close` manual close
//!
//! There is no endpoint that opens the circuit; opening only ever follows a
//! reported dependency failure.

mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::guard::PipelineGuard;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub guard: PipelineGuard,
    /// Absent when metrics are disabled
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(guard: PipelineGuard) -> Self {
        Self {
            guard,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

/// Build the API router.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let v1 = Router::new()
        .route("/circuit-breaker", get(handlers::get_circuit_breaker))
        .route("/circuit-breaker/close", post(handlers::close_circuit_breaker));

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/health/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::prometheus_metrics))
        .nest("/api/v1", v1)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// API response wrapper.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            error_code: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            error_code: None,
        }
    }

    pub fn from_guard_error(err: &crate::error::GuardError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(err.user_message().to_string()),
            error_code: Some(err.code().to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_response_success() {
        let response = ApiResponse::success("test data");
        assert!(response.success);
        assert_eq!(response.data, Some("test data"));
        assert!(response.error.is_none());
    }

    #[test]
    fn test_api_response_from_error() {
        let err = crate::error::GuardError::state_store_unavailable("redis down");
        let response: ApiResponse<()> = ApiResponse::from_guard_error(&err);
        assert!(!response.success);
        assert_eq!(response.error_code.as_deref(), Some("StateStoreUnavailable"));
    }
}
