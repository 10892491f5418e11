//! API request handlers with proper error propagation.
//!
//! Fallible handlers return `Result<impl IntoResponse, GuardError>` so that
//! errors are converted to HTTP status codes by `GuardError`'s
//! `IntoResponse` implementation.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};

use super::{ApiResponse, AppState};
use crate::error::GuardError;

// ═══════════════════════════════════════════════════════════════════════════════
// Health Check
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Ready when both the breaker state store and the job store answer.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let state_store = state.guard.breaker().ping().await;
    let job_store = state.guard.coordinator().paused_job_count().await;

    let ready = state_store.is_ok() && job_store.is_ok();
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let describe = |result: Result<(), GuardError>| match result {
        Ok(()) => "ok".to_string(),
        Err(e) => e.user_message().to_string(),
    };

    (
        status,
        Json(serde_json::json!({
            "status": if ready { "ready" } else { "not_ready" },
            "checks": {
                "state_store": describe(state_store),
                "job_store": describe(job_store.map(|_| ())),
            },
            "timestamp": chrono::Utc::now().to_rfc3339()
        })),
    )
}

pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = state
        .metrics
        .as_ref()
        .map(|handle| handle.render())
        .unwrap_or_default();

    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

// ═══════════════════════════════════════════════════════════════════════════════
// Circuit Breaker
// ═══════════════════════════════════════════════════════════════════════════════

/// Status read. Always succeeds; degraded data is flagged, not hidden.
pub async fn get_circuit_breaker(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.guard.status().await))
}

/// Manual close. On transition the response carries the resume report; a
/// repeated close returns `transitioned: false` and no report.
pub async fn close_circuit_breaker(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, GuardError> {
    let outcome = state.guard.close_circuit().await?;

    tracing::info!(
        transitioned = outcome.transitioned,
        resumed = outcome.report.as_ref().map(|r| r.resumed.len()).unwrap_or(0),
        failed = outcome.report.as_ref().map(|r| r.failed.len()).unwrap_or(0),
        "Manual circuit close handled"
    );

    Ok(Json(ApiResponse::success(outcome)))
}
