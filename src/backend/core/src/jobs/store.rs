//! Job persistence seam.
//!
//! The breaker core touches job rows only through [`JobStore`]. Postgres is
//! the production backend (see `db::PgJobStore`); [`InMemoryJobStore`] backs
//! tests and local development.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use super::{Job, JobFilter, JobId, JobStatus, JobUpdate};
use crate::error::{ErrorCode, GuardError, Result};

/// Transactional storage for job records.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Atomically move every job matching `filter` to `new_status`, applying
    /// `update` to the same rows. Either all matching rows change or none do.
    /// Returns the number of rows changed.
    async fn bulk_transition(
        &self,
        filter: &JobFilter,
        new_status: JobStatus,
        update: &JobUpdate,
    ) -> Result<u64>;

    /// Apply `update` to a single job regardless of its status.
    async fn update_one(&self, id: JobId, update: &JobUpdate) -> Result<()>;

    /// Point-in-time copy of the jobs matching `filter`, oldest first.
    async fn snapshot(&self, filter: &JobFilter) -> Result<Vec<Job>>;

    /// Count the jobs matching `filter`.
    async fn count(&self, filter: &JobFilter) -> Result<u64>;

    /// Insert a new job.
    async fn insert(&self, job: &Job) -> Result<()>;

    /// Fetch a job by id.
    async fn get(&self, id: JobId) -> Result<Option<Job>>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// In-Memory Store
// ═══════════════════════════════════════════════════════════════════════════════

/// In-memory job store for testing and development.
///
/// A single lock guards all rows, so a bulk transition is atomic with respect
/// to every other operation. Failure injection switches simulate an outage
/// and a transaction that aborts halfway through.
#[derive(Clone, Default)]
pub struct InMemoryJobStore {
    jobs: Arc<RwLock<HashMap<JobId, Job>>>,
    unavailable: Arc<AtomicBool>,
    /// Abort the next bulk transition after this many rows (0 = disabled).
    abort_bulk_after: Arc<AtomicUsize>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with jobs.
    pub fn with_jobs(jobs: impl IntoIterator<Item = Job>) -> Self {
        let store = Self::new();
        {
            let mut map = store.jobs.write();
            for job in jobs {
                map.insert(job.id, job);
            }
        }
        store
    }

    /// Simulate the database being unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make the next bulk transition fail after `rows` rows were staged.
    pub fn abort_next_bulk_transition_after(&self, rows: usize) {
        self.abort_bulk_after.store(rows.max(1), Ordering::SeqCst);
    }

    /// Current status of every job (test helper).
    pub fn statuses(&self) -> HashMap<JobId, JobStatus> {
        self.jobs
            .read()
            .iter()
            .map(|(id, job)| (*id, job.status))
            .collect()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(GuardError::with_internal(
                ErrorCode::DatabaseConnectionFailed,
                "Unable to connect to the database",
                "in-memory job store marked unavailable",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn bulk_transition(
        &self,
        filter: &JobFilter,
        new_status: JobStatus,
        update: &JobUpdate,
    ) -> Result<u64> {
        self.check_available()?;

        let update = JobUpdate {
            status: Some(new_status),
            ..update.clone()
        };
        let abort_after = self.abort_bulk_after.swap(0, Ordering::SeqCst);
        let now = Utc::now();

        let mut jobs = self.jobs.write();

        // Stage every change first; nothing is written unless all rows succeed.
        let mut staged = Vec::new();
        for job in jobs.values().filter(|job| filter.matches(job)) {
            if abort_after > 0 && staged.len() >= abort_after {
                return Err(GuardError::with_internal(
                    ErrorCode::DatabaseTransactionFailed,
                    "A database error occurred",
                    format!("transaction aborted after {} rows", staged.len()),
                ));
            }
            let mut changed = job.clone();
            changed.apply(&update, now);
            staged.push(changed);
        }

        let count = staged.len() as u64;
        for job in staged {
            jobs.insert(job.id, job);
        }
        Ok(count)
    }

    async fn update_one(&self, id: JobId, update: &JobUpdate) -> Result<()> {
        self.check_available()?;

        let mut jobs = self.jobs.write();
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| GuardError::job_not_found(id.0))?;
        job.apply(update, Utc::now());
        Ok(())
    }

    async fn snapshot(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        self.check_available()?;

        let mut jobs: Vec<Job> = self
            .jobs
            .read()
            .values()
            .filter(|job| filter.matches(job))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(jobs)
    }

    async fn count(&self, filter: &JobFilter) -> Result<u64> {
        self.check_available()?;

        Ok(self
            .jobs
            .read()
            .values()
            .filter(|job| filter.matches(job))
            .count() as u64)
    }

    async fn insert(&self, job: &Job) -> Result<()> {
        self.check_available()?;

        let mut jobs = self.jobs.write();
        if jobs.contains_key(&job.id) {
            return Err(GuardError::new(
                ErrorCode::DuplicateRecord,
                format!("Job already exists: {}", job.id),
            ));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>> {
        self.check_available()?;
        Ok(self.jobs.read().get(&id).cloned())
    }
}
