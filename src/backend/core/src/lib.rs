#![allow(clippy::result_large_err)]
//! # Leadguard Core
//!
//! Global circuit breaker and job pause/resume coordinator for a
//! lead-generation pipeline that depends on rate-limited third-party APIs.
//!
//! ## Architecture
//!
//! - **Breaker**: one OPEN/CLOSED gate shared by every process through Redis
//! - **Jobs**: job model, transactional job store, task dispatch and retry
//! - **Coordinator**: atomic bulk pause on open, per-job resume on manual close
//! - **Guard**: runs each cascade exactly once per breaker transition
//! - **API**: status read and manual close over HTTP
//! - **Observability**: structured logging, distributed tracing and metrics

pub mod api;
pub mod breaker;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod guard;
pub mod jobs;
pub mod observability;

pub use error::{ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, GuardError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::breaker::{
        BreakerStateStore, CircuitBreaker, CircuitBreakerSnapshot, CircuitState, FailureMetadata,
        InMemoryBreakerStore, RedisBreakerStore, TransitionResult,
    };
    pub use crate::coordinator::{
        QueueCoordinator, ResumeFailure, ResumeOrchestrator, ResumeOutcome, ResumeReport,
    };
    pub use crate::error::{ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, GuardError, Result};
    pub use crate::guard::{CloseOutcome, FailureOutcome, GuardStatus, GuardedHttpClient, PipelineGuard};
    pub use crate::jobs::{
        DispatchError, InMemoryJobStore, InMemoryTaskDispatcher, Job, JobFilter, JobId, JobStatus,
        JobStore, JobUpdate, RetryPolicy, TaskDispatcher, TaskHandle,
    };
}
