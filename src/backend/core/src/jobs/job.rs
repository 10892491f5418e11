//! Job records as seen by the breaker core.
//!
//! The surrounding application owns jobs and their payloads. The core only
//! reads and writes the status and pause metadata:
//!
//! - **JobStatus**: PENDING/PROCESSING/PAUSED/COMPLETED/FAILED
//! - **TaskHandle**: reference to the dispatched unit of work, replaced on every resume
//! - **JobFilter / JobUpdate**: selection and field changes for the job store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{GuardError, Result};

// ═══════════════════════════════════════════════════════════════════════════════
// Job Identification
// ═══════════════════════════════════════════════════════════════════════════════

/// Unique identifier for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Create a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for JobId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Opaque reference to a dispatched unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskHandle(pub String);

impl TaskHandle {
    /// Mint a handle that has never been used before.
    pub fn generate() -> Self {
        Self(format!("task-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Status
// ═══════════════════════════════════════════════════════════════════════════════

/// Status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting to be picked up by a worker
    Pending,
    /// A worker is executing it
    Processing,
    /// Held because the circuit breaker opened
    Paused,
    /// Finished successfully
    Completed,
    /// Finished unsuccessfully
    Failed,
}

impl JobStatus {
    /// Statuses the pause cascade moves into PAUSED.
    pub const ACTIVE: [JobStatus; 2] = [JobStatus::Pending, JobStatus::Processing];

    /// Check if a job in this status is eligible for pausing.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = GuardError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(GuardError::with_internal(
                crate::error::ErrorCode::DeserializationError,
                "Unknown job status",
                format!("unknown job status: {}", other),
            )),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Record
// ═══════════════════════════════════════════════════════════════════════════════

/// A unit of background work tracked through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub pause_reason: Option<String>,
    pub task_handle: Option<TaskHandle>,
    pub error: Option<String>,
    /// Application-defined payload; never interpreted by the core.
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a new pending job with the given payload.
    pub fn new(payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            status: JobStatus::Pending,
            pause_reason: None,
            task_handle: None,
            error: None,
            payload,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the status (builder style, mostly for seeding tests and fixtures).
    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = status;
        self
    }

    /// Set the current task handle.
    pub fn with_task_handle(mut self, handle: TaskHandle) -> Self {
        self.task_handle = Some(handle);
        self
    }

    /// Apply a field update in place.
    pub fn apply(&mut self, update: &JobUpdate, now: DateTime<Utc>) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(reason) = &update.pause_reason {
            self.pause_reason = reason.clone();
        }
        if let Some(handle) = &update.task_handle {
            self.task_handle = handle.clone();
        }
        if let Some(error) = &update.error {
            self.error = error.clone();
        }
        self.updated_at = now;
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Filters and Updates
// ═══════════════════════════════════════════════════════════════════════════════

/// Selects jobs by status and, optionally, by id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFilter {
    /// Match any of these statuses (empty = any status)
    pub statuses: Vec<JobStatus>,
    /// Restrict to these ids
    pub ids: Option<Vec<JobId>>,
}

impl JobFilter {
    /// Jobs in any of the given statuses.
    pub fn with_statuses(statuses: impl IntoIterator<Item = JobStatus>) -> Self {
        Self {
            statuses: statuses.into_iter().collect(),
            ids: None,
        }
    }

    /// PENDING or PROCESSING jobs.
    pub fn active() -> Self {
        Self::with_statuses(JobStatus::ACTIVE)
    }

    /// PAUSED jobs.
    pub fn paused() -> Self {
        Self::with_statuses([JobStatus::Paused])
    }

    /// Narrow the filter to a single job.
    pub fn for_job(mut self, id: JobId) -> Self {
        self.ids = Some(vec![id]);
        self
    }

    /// Check whether a job matches.
    pub fn matches(&self, job: &Job) -> bool {
        let status_ok = self.statuses.is_empty() || self.statuses.contains(&job.status);
        let id_ok = self
            .ids
            .as_ref()
            .map(|ids| ids.contains(&job.id))
            .unwrap_or(true);
        status_ok && id_ok
    }
}

/// Field changes applied by the job store.
///
/// `None` leaves a field untouched; `Some(None)` clears a nullable field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub pause_reason: Option<Option<String>>,
    pub task_handle: Option<Option<TaskHandle>>,
    pub error: Option<Option<String>>,
}

impl JobUpdate {
    /// Move into PAUSED with the given reason.
    pub fn paused(reason: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Paused),
            pause_reason: Some(Some(reason.into())),
            ..Default::default()
        }
    }

    /// Back to PENDING under a fresh task handle.
    pub fn resumed(handle: TaskHandle) -> Self {
        Self {
            status: Some(JobStatus::Pending),
            pause_reason: Some(None),
            task_handle: Some(Some(handle)),
            error: None,
        }
    }

    /// Terminal failure with a descriptive message.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            error: Some(Some(error.into())),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.pause_reason.is_none()
            && self.task_handle.is_none()
            && self.error.is_none()
    }
}
