//! Task dispatch: turning a job into a running unit of work.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;

use super::{Job, JobId, TaskHandle};

/// Why a dispatch attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// Worth retrying (connection hiccup, timeout, backpressure)
    #[error("transient dispatch error: {0}")]
    Transient(String),
    /// Retrying will not help (malformed payload, rejected by the substrate)
    #[error("permanent dispatch error: {0}")]
    Permanent(String),
}

impl DispatchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Transient(m) | Self::Permanent(m) => m,
        }
    }
}

/// The execution substrate. Only `submit` is needed; cancellation is not.
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    /// Dispatch the job and return the handle of the new unit of work.
    async fn submit(&self, job: &Job) -> Result<TaskHandle, DispatchError>;
}

/// What a worker receives for a dispatched job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchEnvelope {
    pub task_handle: TaskHandle,
    pub job_id: JobId,
    pub payload: serde_json::Value,
    pub dispatched_at: DateTime<Utc>,
}

impl DispatchEnvelope {
    fn for_job(job: &Job) -> Self {
        Self {
            task_handle: TaskHandle::generate(),
            job_id: job.id,
            payload: job.payload.clone(),
            dispatched_at: Utc::now(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// In-Memory Dispatcher
// ═══════════════════════════════════════════════════════════════════════════════

/// In-memory dispatcher for local development and tests.
#[derive(Clone, Default)]
pub struct InMemoryTaskDispatcher {
    queue: Arc<RwLock<VecDeque<DispatchEnvelope>>>,
}

impl InMemoryTaskDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the next dispatched envelope, as a worker would.
    pub async fn pop(&self) -> Option<DispatchEnvelope> {
        self.queue.write().await.pop_front()
    }

    pub async fn len(&self) -> usize {
        self.queue.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.queue.read().await.is_empty()
    }

    /// Everything dispatched so far, oldest first.
    pub async fn dispatched(&self) -> Vec<DispatchEnvelope> {
        self.queue.read().await.iter().cloned().collect()
    }
}

#[async_trait]
impl TaskDispatcher for InMemoryTaskDispatcher {
    async fn submit(&self, job: &Job) -> Result<TaskHandle, DispatchError> {
        let envelope = DispatchEnvelope::for_job(job);
        let handle = envelope.task_handle.clone();
        self.queue.write().await.push_back(envelope);
        Ok(handle)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Redis Dispatcher
// ═══════════════════════════════════════════════════════════════════════════════

/// Redis-backed dispatcher: pushes envelopes onto a list that workers BLPOP.
pub struct RedisTaskDispatcher {
    client: redis::Client,
    queue_key: String,
    command_timeout: Duration,
}

impl RedisTaskDispatcher {
    /// Create a new Redis dispatcher.
    ///
    /// # Arguments
    /// * `client` - A Redis client
    /// * `queue_key` - The Redis list key to push onto (e.g. `"leadguard:jobs:dispatch"`)
    /// * `command_timeout` - Upper bound for connect + push
    pub fn new(client: redis::Client, queue_key: impl Into<String>, command_timeout: Duration) -> Self {
        Self {
            client,
            queue_key: queue_key.into(),
            command_timeout,
        }
    }

    pub fn queue_key(&self) -> &str {
        &self.queue_key
    }

    async fn push(&self, serialized: &str) -> Result<i64, DispatchError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| DispatchError::Transient(format!("redis connection failed: {}", e)))?;

        redis::cmd("RPUSH")
            .arg(&self.queue_key)
            .arg(serialized)
            .query_async::<_, i64>(&mut conn)
            .await
            .map_err(|e| DispatchError::Transient(format!("RPUSH failed: {}", e)))
    }
}

#[async_trait]
impl TaskDispatcher for RedisTaskDispatcher {
    async fn submit(&self, job: &Job) -> Result<TaskHandle, DispatchError> {
        let envelope = DispatchEnvelope::for_job(job);
        let serialized = serde_json::to_string(&envelope)
            .map_err(|e| DispatchError::Permanent(format!("failed to serialize job: {}", e)))?;

        let depth = tokio::time::timeout(self.command_timeout, self.push(&serialized))
            .await
            .map_err(|_| DispatchError::Transient("redis dispatch timed out".to_string()))??;

        tracing::debug!(
            queue = %self.queue_key,
            job_id = %job.id,
            task_handle = %envelope.task_handle,
            depth = depth,
            "Job dispatched"
        );
        Ok(envelope.task_handle)
    }
}
