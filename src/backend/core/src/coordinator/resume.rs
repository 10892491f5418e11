//! Re-dispatch of paused jobs after the breaker closes.
//!
//! Each job is handled independently: one job's failure never blocks or
//! rolls back another job's success. The outcome of every job is durable
//! once written, and the whole batch is summarised in a [`ResumeReport`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use crate::jobs::{
    DispatchError, Job, JobFilter, JobId, JobStatus, JobStore, JobUpdate, RetryPolicy,
    TaskDispatcher, TaskHandle,
};
use crate::error::GuardError;
use crate::observability::{metrics, GuardEvent};

// ═══════════════════════════════════════════════════════════════════════════════
// Report Types
// ═══════════════════════════════════════════════════════════════════════════════

/// One job that could not be resumed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeFailure {
    pub job_id: JobId,
    pub reason: String,
}

/// Per-job outcomes of one resume cascade. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeReport {
    pub resumed: Vec<JobId>,
    pub failed: Vec<ResumeFailure>,
    pub attempted_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ResumeReport {
    fn started(attempted_at: DateTime<Utc>) -> Self {
        Self {
            resumed: Vec::new(),
            failed: Vec::new(),
            attempted_at,
            finished_at: attempted_at,
        }
    }

    /// Number of jobs the cascade looked at.
    pub fn total(&self) -> usize {
        self.resumed.len() + self.failed.len()
    }

    /// Every job in the snapshot was resumed.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failure_for(&self, job_id: JobId) -> Option<&ResumeFailure> {
        self.failed.iter().find(|f| f.job_id == job_id)
    }
}

/// Result of resuming a single job.
#[derive(Debug, Clone, PartialEq)]
pub enum ResumeOutcome {
    /// Dispatched and moved back to PENDING with a fresh handle.
    Resumed { task_handle: TaskHandle, attempts: u32 },
    /// Not resumed; the job was moved to FAILED where possible.
    Failed { reason: String },
}

impl ResumeOutcome {
    pub fn is_resumed(&self) -> bool {
        matches!(self, Self::Resumed { .. })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Orchestrator
// ═══════════════════════════════════════════════════════════════════════════════

/// Drives each paused job through the dispatcher with bounded retry.
#[derive(Clone)]
pub struct ResumeOrchestrator {
    jobs: Arc<dyn JobStore>,
    dispatcher: Arc<dyn TaskDispatcher>,
    policy: RetryPolicy,
}

impl ResumeOrchestrator {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        dispatcher: Arc<dyn TaskDispatcher>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            jobs,
            dispatcher,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Resume every job in `jobs` (a snapshot of PAUSED jobs). Never fails as
    /// a whole; per-job problems end up in the report.
    pub async fn resume_all_paused_jobs(&self, jobs: Vec<Job>) -> ResumeReport {
        let started = Instant::now();
        let mut report = ResumeReport::started(Utc::now());

        for job in &jobs {
            match self.resume_job(job).await {
                ResumeOutcome::Resumed { .. } => report.resumed.push(job.id),
                ResumeOutcome::Failed { reason } => report.failed.push(ResumeFailure {
                    job_id: job.id,
                    reason,
                }),
            }
        }

        report.finished_at = Utc::now();
        let elapsed = started.elapsed();
        metrics::record_resume_duration(elapsed.as_secs_f64());
        GuardEvent::ResumeCompleted {
            resumed: report.resumed.len(),
            failed: report.failed.len(),
            duration_ms: elapsed.as_millis() as u64,
        }
        .log();

        report
    }

    /// Dispatch one paused job and record the outcome on the job.
    ///
    /// On success the job moves to PENDING with the new task handle and its
    /// pause reason cleared. On exhaustion (or a permanent dispatch error) it
    /// moves to FAILED with a descriptive error. Both writes only apply while
    /// the job is still PAUSED.
    pub async fn resume_job(&self, job: &Job) -> ResumeOutcome {
        let outcome = match self.dispatch_with_retry(job).await {
            Ok((task_handle, attempts)) => self.mark_resumed(job, task_handle, attempts).await,
            Err(reason) => self.mark_failed(job, reason).await,
        };

        match &outcome {
            ResumeOutcome::Resumed {
                task_handle,
                attempts,
            } => {
                metrics::record_job_resumed();
                GuardEvent::JobResumed {
                    job_id: job.id.to_string(),
                    task_handle: task_handle.to_string(),
                    attempts: *attempts,
                }
                .log();
            }
            ResumeOutcome::Failed { reason } => {
                metrics::record_job_resume_failed();
                GuardEvent::JobResumeFailed {
                    job_id: job.id.to_string(),
                    reason: reason.clone(),
                }
                .log();
            }
        }
        outcome
    }

    /// Submit with per-attempt timeout and backoff between transient failures.
    /// A timeout counts as transient; a permanent error stops immediately.
    async fn dispatch_with_retry(&self, job: &Job) -> Result<(TaskHandle, u32), String> {
        let mut attempts = 0u32;

        loop {
            attempts += 1;

            let result =
                match tokio::time::timeout(self.policy.attempt_timeout, self.dispatcher.submit(job))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(DispatchError::Transient(format!(
                        "dispatch timed out after {:?}",
                        self.policy.attempt_timeout
                    ))),
                };

            match result {
                Ok(handle) => return Ok((handle, attempts)),
                Err(DispatchError::Permanent(message)) => {
                    return Err(format!("dispatch rejected: {}", message));
                }
                Err(DispatchError::Transient(message)) => {
                    if !self.policy.should_retry(attempts) {
                        return Err(format!(
                            "dispatch exhausted after {} attempts: {}",
                            attempts, message
                        ));
                    }

                    let delay = self.policy.backoff.delay_for_attempt(attempts - 1);
                    tracing::debug!(
                        job_id = %job.id,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "Transient dispatch error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn mark_resumed(&self, job: &Job, task_handle: TaskHandle, attempts: u32) -> ResumeOutcome {
        let filter = JobFilter::paused().for_job(job.id);
        let update = JobUpdate::resumed(task_handle.clone());

        match self
            .jobs
            .bulk_transition(&filter, JobStatus::Pending, &update)
            .await
        {
            Ok(1) => ResumeOutcome::Resumed {
                task_handle,
                attempts,
            },
            Ok(_) => {
                tracing::warn!(
                    job_id = %job.id,
                    task_handle = %task_handle,
                    "Job left PAUSED before its resume was recorded; dispatched task is orphaned"
                );
                ResumeOutcome::Failed {
                    reason: format!(
                        "job no longer paused; dispatched task {} not recorded",
                        task_handle
                    ),
                }
            }
            Err(e) => {
                e.log();
                ResumeOutcome::Failed {
                    reason: format!(
                        "dispatched as {} but recording the resume failed: {}",
                        task_handle, e
                    ),
                }
            }
        }
    }

    async fn mark_failed(&self, job: &Job, reason: String) -> ResumeOutcome {
        GuardError::dispatch_failed(job.id.0, reason.as_str()).log();

        let filter = JobFilter::paused().for_job(job.id);
        let update = JobUpdate::failed(reason.clone());

        match self
            .jobs
            .bulk_transition(&filter, JobStatus::Failed, &update)
            .await
        {
            Ok(0) => {
                tracing::warn!(job_id = %job.id, "Job left PAUSED before its failure was recorded");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(
                    job_id = %job.id,
                    error = %e,
                    "Failed to mark job FAILED after resume exhaustion; job remains PAUSED"
                );
            }
        }
        ResumeOutcome::Failed { reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{BackoffStrategy, InMemoryJobStore, InMemoryTaskDispatcher};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Fails transiently `failures` times, then succeeds.
    struct FlakyDispatcher {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl TaskDispatcher for FlakyDispatcher {
        async fn submit(&self, _job: &Job) -> Result<TaskHandle, DispatchError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(DispatchError::Transient("connection reset".into()))
            } else {
                Ok(TaskHandle::generate())
            }
        }
    }

    struct HangingDispatcher;

    #[async_trait]
    impl TaskDispatcher for HangingDispatcher {
        async fn submit(&self, _job: &Job) -> Result<TaskHandle, DispatchError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(TaskHandle::generate())
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::with_attempts(3)
            .with_backoff(BackoffStrategy::none())
            .with_attempt_timeout(Duration::from_millis(50))
    }

    fn paused_job() -> Job {
        Job::new(serde_json::json!({"lead": "acme"})).with_status(JobStatus::Paused)
    }

    #[tokio::test]
    async fn test_resume_job_retries_transient_errors() {
        let job = paused_job();
        let store = InMemoryJobStore::with_jobs([job.clone()]);
        let dispatcher = Arc::new(FlakyDispatcher {
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let orchestrator = ResumeOrchestrator::new(Arc::new(store.clone()), dispatcher.clone(), policy());

        let outcome = orchestrator.resume_job(&job).await;

        match outcome {
            ResumeOutcome::Resumed { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("expected resume, got {:?}", other),
        }
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 3);

        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Pending);
        assert!(stored.pause_reason.is_none());
        assert!(stored.task_handle.is_some());
    }

    #[tokio::test]
    async fn test_resume_job_exhausts_budget() {
        let job = paused_job();
        let store = InMemoryJobStore::with_jobs([job.clone()]);
        let dispatcher = Arc::new(FlakyDispatcher {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        });
        let orchestrator = ResumeOrchestrator::new(Arc::new(store.clone()), dispatcher.clone(), policy());

        let outcome = orchestrator.resume_job(&job).await;

        assert!(!outcome.is_resumed());
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 3);

        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert!(stored.error.unwrap().starts_with("dispatch exhausted"));
    }

    #[tokio::test]
    async fn test_attempt_timeout_counts_as_transient() {
        let job = paused_job();
        let store = InMemoryJobStore::with_jobs([job.clone()]);
        let orchestrator =
            ResumeOrchestrator::new(Arc::new(store.clone()), Arc::new(HangingDispatcher), policy());

        let outcome = orchestrator.resume_job(&job).await;

        match outcome {
            ResumeOutcome::Failed { reason } => {
                assert!(reason.contains("after 3 attempts"));
                assert!(reason.contains("timed out"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_job_completed_meanwhile_is_not_resurrected() {
        let job = paused_job();
        let store = InMemoryJobStore::with_jobs([job.clone()]);
        store
            .update_one(job.id, &JobUpdate {
                status: Some(JobStatus::Completed),
                ..Default::default()
            })
            .await
            .unwrap();

        let orchestrator = ResumeOrchestrator::new(
            Arc::new(store.clone()),
            Arc::new(InMemoryTaskDispatcher::new()),
            policy(),
        );
        let report = orchestrator.resume_all_paused_jobs(vec![job.clone()]).await;

        assert!(report.resumed.is_empty());
        assert!(report.failure_for(job.id).is_some());
        assert_eq!(
            store.get(job.id).await.unwrap().unwrap().status,
            JobStatus::Completed
        );
    }
}
