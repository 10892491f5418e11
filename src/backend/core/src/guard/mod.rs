//! Pipeline guard: the breaker and the coordinator wired together.
//!
//! The breaker only reports whether a transition happened. This is where the
//! cascade runs, exactly once per transition: a pause after the breaker
//! opens, a resume after an operator closes it.

mod http;

pub use http::GuardedHttpClient;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;

use crate::breaker::{CircuitBreaker, CircuitBreakerSnapshot, CircuitState, TransitionResult};
use crate::coordinator::{QueueCoordinator, ResumeReport};
use crate::error::{GuardError, Result};

/// What happened when a failure was reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureOutcome {
    pub transition: TransitionResult,
    /// Jobs paused by this report's cascade; `None` when no cascade ran
    pub jobs_paused: Option<u64>,
}

/// Result of an operator close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseOutcome {
    pub transitioned: bool,
    /// Present only when this call performed the OPEN to CLOSED transition
    pub report: Option<ResumeReport>,
}

/// Status read for operators and dashboards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardStatus {
    pub circuit_breaker: CircuitBreakerSnapshot,
    /// `None` when the job store could not be read
    pub paused_job_count: Option<u64>,
    /// Some part of the status is a fail-safe default, not an observed value
    pub degraded: bool,
}

#[derive(Clone)]
pub struct PipelineGuard {
    breaker: CircuitBreaker,
    coordinator: QueueCoordinator,
}

impl PipelineGuard {
    pub fn new(breaker: CircuitBreaker, coordinator: QueueCoordinator) -> Self {
        Self {
            breaker,
            coordinator,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn coordinator(&self) -> &QueueCoordinator {
        &self.coordinator
    }

    /// Report a dependency failure. The caller that opens the circuit runs
    /// the pause cascade; everyone else only refreshes the failure metadata.
    ///
    /// Errors are `StateStoreUnavailable` (nothing changed, retry or alert)
    /// and `BulkTransitionFailed` (the circuit is open but jobs may still be
    /// active).
    pub async fn report_failure(&self, error: &str, error_type: &str) -> Result<FailureOutcome> {
        let transition = self
            .breaker
            .record_failure(error, error_type)
            .await
            .map_err(log_error)?;

        if !transition.transitioned() {
            return Ok(FailureOutcome {
                transition,
                jobs_paused: None,
            });
        }

        let paused = self
            .coordinator
            .pause_all_active_jobs(error)
            .await
            .map_err(log_error)?;

        Ok(FailureOutcome {
            transition,
            jobs_paused: Some(paused),
        })
    }

    pub fn report_success(&self) {
        self.breaker.record_success();
    }

    /// Operator close. Only the caller that performs the transition runs the
    /// resume cascade and gets a report.
    ///
    /// The PAUSED snapshot is read while the circuit is still open. If the
    /// job store cannot be read the call fails with `ResumeFailed` and the
    /// circuit stays open, so the close can simply be retried.
    pub async fn close_circuit(&self) -> Result<CloseOutcome> {
        let snapshot = if self.breaker.get_state().await.state == CircuitState::Open {
            Some(self.coordinator.paused_snapshot().await.map_err(log_error)?)
        } else {
            None
        };

        let transition = self
            .breaker
            .manually_close_circuit()
            .await
            .map_err(log_error)?;

        if !transition.transitioned() {
            return Ok(CloseOutcome {
                transitioned: false,
                report: None,
            });
        }

        // opened by someone else between the state read and the close
        let snapshot = match snapshot {
            Some(snapshot) => snapshot,
            None => self.coordinator.paused_snapshot().await.map_err(log_error)?,
        };
        let report = self.coordinator.resume_jobs(snapshot).await;

        Ok(CloseOutcome {
            transitioned: true,
            report: Some(report),
        })
    }

    /// Best-effort status. Never fails.
    pub async fn status(&self) -> GuardStatus {
        let circuit_breaker = self.breaker.get_state().await;
        let paused_job_count = match self.coordinator.paused_job_count().await {
            Ok(count) => Some(count),
            Err(e) => {
                tracing::warn!(error = %e, "Paused job count unavailable");
                None
            }
        };

        GuardStatus {
            degraded: circuit_breaker.degraded || paused_job_count.is_none(),
            circuit_breaker,
            paused_job_count,
        }
    }

    /// Gate and record one dependency call.
    ///
    /// Refuses with `CircuitOpen` without polling `call` when the breaker
    /// blocks. An `Err` from the call is reported as a failure of `service`
    /// and handed back as `DependencyFailure`, unless reporting it failed:
    /// then the caller gets that `StateStoreUnavailable` or
    /// `BulkTransitionFailed` instead, with the dependency error in its
    /// context. An `Ok` is reported as a success.
    pub async fn call<T, E, F>(&self, service: &str, call: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, E>>,
        E: fmt::Display,
    {
        if !self.breaker.should_allow_request().await {
            return Err(GuardError::circuit_open(service));
        }

        match call.await {
            Ok(value) => {
                self.report_success();
                Ok(value)
            }
            Err(e) => {
                let message = e.to_string();
                match self.report_failure(&message, service).await {
                    Ok(_) => Err(GuardError::dependency_failure(service, message)),
                    Err(report_error) => Err(report_error
                        .with_context("service", service)
                        .with_context("dependency_error", &message)),
                }
            }
        }
    }
}

fn log_error(error: GuardError) -> GuardError {
    error.log();
    error
}
