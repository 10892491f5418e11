//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use leadguard_core::breaker::{BreakerStateStore, CircuitBreaker, FailureMetadata, InMemoryBreakerStore};
use leadguard_core::coordinator::{QueueCoordinator, ResumeOrchestrator};
use leadguard_core::guard::PipelineGuard;
use leadguard_core::jobs::{
    BackoffStrategy, DispatchError, InMemoryJobStore, Job, JobFilter, JobId, JobStatus, JobStore,
    JobUpdate, RetryPolicy, TaskDispatcher, TaskHandle,
};
use leadguard_core::Result;

// ============================================================================
// Job Store Wrapper
// ============================================================================

/// In-memory job store that counts how often each cascade hit it.
#[derive(Clone, Default)]
pub struct CountingJobStore {
    pub inner: InMemoryJobStore,
    pause_cascades: Arc<AtomicU32>,
    resume_snapshots: Arc<AtomicU32>,
}

impl CountingJobStore {
    pub fn with_jobs(jobs: impl IntoIterator<Item = Job>) -> Self {
        Self {
            inner: InMemoryJobStore::with_jobs(jobs),
            ..Default::default()
        }
    }

    pub fn pause_cascades(&self) -> u32 {
        self.pause_cascades.load(Ordering::SeqCst)
    }

    pub fn resume_snapshots(&self) -> u32 {
        self.resume_snapshots.load(Ordering::SeqCst)
    }

    pub async fn status_of(&self, id: JobId) -> JobStatus {
        self.inner.get(id).await.unwrap().unwrap().status
    }

    pub async fn job(&self, id: JobId) -> Job {
        self.inner.get(id).await.unwrap().unwrap()
    }

    pub fn count_in(&self, status: JobStatus) -> usize {
        self.inner
            .statuses()
            .values()
            .filter(|s| **s == status)
            .count()
    }
}

#[async_trait]
impl JobStore for CountingJobStore {
    async fn bulk_transition(
        &self,
        filter: &JobFilter,
        new_status: JobStatus,
        update: &JobUpdate,
    ) -> Result<u64> {
        if *filter == JobFilter::active() && new_status == JobStatus::Paused {
            self.pause_cascades.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.bulk_transition(filter, new_status, update).await
    }

    async fn update_one(&self, id: JobId, update: &JobUpdate) -> Result<()> {
        self.inner.update_one(id, update).await
    }

    async fn snapshot(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        if *filter == JobFilter::paused() {
            self.resume_snapshots.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.snapshot(filter).await
    }

    async fn count(&self, filter: &JobFilter) -> Result<u64> {
        self.inner.count(filter).await
    }

    async fn insert(&self, job: &Job) -> Result<()> {
        self.inner.insert(job).await
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>> {
        self.inner.get(id).await
    }
}

// ============================================================================
// Scripted Dispatcher
// ============================================================================

/// Dispatcher whose per-job outcomes are scripted. Unscripted jobs succeed.
#[derive(Default)]
pub struct ScriptedDispatcher {
    scripts: Mutex<HashMap<JobId, VecDeque<std::result::Result<(), DispatchError>>>>,
    always_fail: Mutex<HashMap<JobId, DispatchError>>,
    calls: Mutex<HashMap<JobId, u32>>,
    handles: Mutex<Vec<TaskHandle>>,
}

impl ScriptedDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Outcomes for the next attempts on `job_id`, in order.
    pub fn script(&self, job_id: JobId, outcomes: Vec<std::result::Result<(), DispatchError>>) {
        self.scripts.lock().insert(job_id, outcomes.into());
    }

    /// Every attempt on `job_id` fails with `error`.
    pub fn fail_always(&self, job_id: JobId, error: DispatchError) {
        self.always_fail.lock().insert(job_id, error);
    }

    pub fn calls_for(&self, job_id: JobId) -> u32 {
        self.calls.lock().get(&job_id).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.calls.lock().values().sum()
    }

    pub fn issued_handles(&self) -> Vec<TaskHandle> {
        self.handles.lock().clone()
    }
}

#[async_trait]
impl TaskDispatcher for ScriptedDispatcher {
    async fn submit(&self, job: &Job) -> std::result::Result<TaskHandle, DispatchError> {
        *self.calls.lock().entry(job.id).or_insert(0) += 1;

        if let Some(error) = self.always_fail.lock().get(&job.id) {
            return Err(error.clone());
        }

        let scripted = self
            .scripts
            .lock()
            .get_mut(&job.id)
            .and_then(|outcomes| outcomes.pop_front());
        if let Some(Err(error)) = scripted {
            return Err(error);
        }

        let handle = TaskHandle::generate();
        self.handles.lock().push(handle.clone());
        Ok(handle)
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub breaker_store: InMemoryBreakerStore,
    pub jobs: CountingJobStore,
    pub dispatcher: Arc<ScriptedDispatcher>,
    pub guard: PipelineGuard,
}

impl Harness {
    /// Breaker initialized CLOSED over the given jobs.
    pub async fn closed(jobs: Vec<Job>) -> Self {
        let harness = Self::build(jobs);
        harness.guard.breaker().initialize().await.unwrap();
        harness
    }

    /// Breaker already OPEN (set directly on the store, no cascade).
    pub async fn open(jobs: Vec<Job>) -> Self {
        let harness = Self::build(jobs);
        harness
            .breaker_store
            .open(&FailureMetadata::new("timeout", "network", Utc::now()), Utc::now())
            .await
            .unwrap();
        harness
    }

    /// No breaker record at all.
    pub fn uninitialized(jobs: Vec<Job>) -> Self {
        Self::build(jobs)
    }

    fn build(jobs: Vec<Job>) -> Self {
        let breaker_store = InMemoryBreakerStore::new();
        let job_store = CountingJobStore::with_jobs(jobs);
        let dispatcher = Arc::new(ScriptedDispatcher::new());

        let breaker = CircuitBreaker::new(Arc::new(breaker_store.clone()));
        let store: Arc<dyn JobStore> = Arc::new(job_store.clone());
        let orchestrator = ResumeOrchestrator::new(store.clone(), dispatcher.clone(), fast_policy());
        let coordinator = QueueCoordinator::new(breaker.clone(), store, orchestrator);

        Self {
            breaker_store,
            jobs: job_store,
            dispatcher,
            guard: PipelineGuard::new(breaker, coordinator),
        }
    }
}

pub fn fast_policy() -> RetryPolicy {
    RetryPolicy::with_attempts(3)
        .with_backoff(BackoffStrategy::none())
        .with_attempt_timeout(Duration::from_millis(200))
}

pub fn job(status: JobStatus) -> Job {
    Job::new(serde_json::json!({"lead_id": uuid::Uuid::new_v4()})).with_status(status)
}

pub fn jobs(status: JobStatus, n: usize) -> Vec<Job> {
    (0..n).map(|_| job(status)).collect()
}
