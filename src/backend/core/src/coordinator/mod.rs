//! Translates confirmed breaker transitions into bulk job changes.
//!
//! The coordinator never reacts to individual failures. It is invoked once
//! per transition: [`QueueCoordinator::pause_all_active_jobs`] after the
//! breaker opens, [`QueueCoordinator::resume_all_paused_jobs`] after it is
//! manually closed.

mod resume;

pub use resume::{ResumeFailure, ResumeOrchestrator, ResumeOutcome, ResumeReport};

use std::sync::Arc;

use crate::breaker::CircuitBreaker;
use crate::error::{GuardError, Result};
use crate::jobs::{Job, JobFilter, JobStatus, JobStore, JobUpdate};
use crate::observability::{metrics, GuardEvent};

/// Bulk pause/resume of jobs around breaker transitions.
#[derive(Clone)]
pub struct QueueCoordinator {
    breaker: CircuitBreaker,
    jobs: Arc<dyn JobStore>,
    orchestrator: ResumeOrchestrator,
}

impl QueueCoordinator {
    pub fn new(
        breaker: CircuitBreaker,
        jobs: Arc<dyn JobStore>,
        orchestrator: ResumeOrchestrator,
    ) -> Self {
        Self {
            breaker,
            jobs,
            orchestrator,
        }
    }

    /// Move every PENDING/PROCESSING job to PAUSED in one transaction.
    ///
    /// The update is conditional on the status at write time, so a job that
    /// completed an instant earlier is left alone. Jobs already PAUSED,
    /// COMPLETED or FAILED are never touched. All or nothing.
    pub async fn pause_all_active_jobs(&self, reason: &str) -> Result<u64> {
        let paused = self
            .jobs
            .bulk_transition(
                &JobFilter::active(),
                JobStatus::Paused,
                &JobUpdate::paused(reason),
            )
            .await
            .map_err(|e| GuardError::bulk_transition_failed(e.to_string()).with_source(e))?;

        metrics::record_jobs_paused(paused);
        GuardEvent::JobsPaused {
            count: paused,
            reason: reason.to_string(),
        }
        .log();

        Ok(paused)
    }

    /// Resume the jobs that are PAUSED right now.
    ///
    /// Jobs paused after the snapshot is taken wait for the next cycle. An
    /// error means the snapshot itself could not be read and nothing was
    /// resumed; per-job failures are reported, not raised.
    pub async fn resume_all_paused_jobs(&self) -> Result<ResumeReport> {
        let snapshot = self.paused_snapshot().await?;
        Ok(self.resume_jobs(snapshot).await)
    }

    /// Read the PAUSED jobs. Fails with `ResumeFailed`.
    pub async fn paused_snapshot(&self) -> Result<Vec<Job>> {
        self.jobs.snapshot(&JobFilter::paused()).await.map_err(|e| {
            GuardError::resume_failed(format!("failed to read paused jobs: {}", e)).with_source(e)
        })
    }

    /// Resume a snapshot taken with [`Self::paused_snapshot`].
    pub async fn resume_jobs(&self, snapshot: Vec<Job>) -> ResumeReport {
        tracing::info!(count = snapshot.len(), "Resuming paused jobs");
        self.orchestrator.resume_all_paused_jobs(snapshot).await
    }

    /// Called by workers right before starting a job. When `false` the worker
    /// must not dispatch and must leave the job's status alone.
    pub async fn should_process_job(&self) -> bool {
        self.breaker.should_allow_request().await
    }

    pub async fn paused_job_count(&self) -> Result<u64> {
        self.jobs.count(&JobFilter::paused()).await
    }

    pub fn orchestrator(&self) -> &ResumeOrchestrator {
        &self.orchestrator
    }
}
