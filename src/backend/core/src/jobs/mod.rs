//! Job model and the collaborators the breaker core drives.
//!
//! - **Job**: status and pause metadata of one unit of pipeline work
//! - **JobStore**: transactional storage with atomic bulk transitions
//! - **TaskDispatcher**: the execution substrate (submit a job, get a task handle)
//! - **RetryPolicy**: bounded retry with backoff for dispatch
//!
//! ```text
//!  PENDING/PROCESSING ──(breaker opens)──▶ PAUSED
//!  PAUSED ──(breaker closes, dispatch ok)──▶ PENDING (new task handle)
//!  PAUSED ──(breaker closes, retries exhausted)──▶ FAILED
//! ```

mod dispatcher;
mod job;
mod retry;
mod store;

pub use dispatcher::{
    DispatchEnvelope, DispatchError, InMemoryTaskDispatcher, RedisTaskDispatcher, TaskDispatcher,
};
pub use job::{Job, JobFilter, JobId, JobStatus, JobUpdate, TaskHandle};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use store::{InMemoryJobStore, JobStore};
