//! Global circuit breaker.
//!
//! One breaker guards the whole pipeline. It has exactly two states:
//!
//! ```text
//!   CLOSED ──(any reported failure)──▶ OPEN
//!   OPEN ──(operator close)──▶ CLOSED
//! ```
//!
//! There is no half-open probing and no automatic recovery: successes never
//! close the circuit. The state lives in a shared [`BreakerStateStore`] so
//! every process observes the same value. When the state cannot be read the
//! breaker refuses work.

mod redis_store;
mod store;

pub use redis_store::RedisBreakerStore;
pub use store::{BreakerStateStore, InMemoryBreakerStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::observability::{metrics, GuardEvent};

// ═══════════════════════════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════════════════════════

/// Circuit state. There is no half-open value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CircuitState {
    Closed,
    Open,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diagnostic context of the most recent failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureMetadata {
    pub last_error: String,
    pub error_type: String,
    pub failed_at: DateTime<Utc>,
}

impl FailureMetadata {
    pub fn new(
        last_error: impl Into<String>,
        error_type: impl Into<String>,
        failed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            last_error: last_error.into(),
            error_type: error_type.into(),
            failed_at,
        }
    }
}

/// The persisted breaker record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerRecord {
    pub state: CircuitState,
    pub opened_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub metadata: Option<FailureMetadata>,
    /// Incremented on every write
    pub version: u64,
}

impl BreakerRecord {
    /// The bootstrap record: CLOSED, never opened.
    pub fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            opened_at: None,
            closed_at: None,
            metadata: None,
            version: 0,
        }
    }

    pub fn opened(metadata: FailureMetadata, now: DateTime<Utc>) -> Self {
        Self {
            state: CircuitState::Open,
            opened_at: Some(now),
            closed_at: None,
            metadata: Some(metadata),
            version: 1,
        }
    }
}

/// Point-in-time view of the breaker, as returned by `get_state`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub opened_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        serialize_with = "serialize_metadata",
        deserialize_with = "deserialize_metadata"
    )]
    pub metadata: Option<FailureMetadata>,
    /// The store was unreachable or the record missing; `state` is the
    /// fail-safe OPEN, not an observed value.
    #[serde(default)]
    pub degraded: bool,
}

impl CircuitBreakerSnapshot {
    fn from_record(record: BreakerRecord) -> Self {
        Self {
            state: record.state,
            opened_at: record.opened_at,
            closed_at: record.closed_at,
            metadata: record.metadata,
            degraded: false,
        }
    }

    fn degraded() -> Self {
        Self {
            state: CircuitState::Open,
            opened_at: None,
            closed_at: None,
            metadata: None,
            degraded: true,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == CircuitState::Open
    }
}

// Cleared metadata is rendered as `{}` rather than `null`.
fn serialize_metadata<S>(metadata: &Option<FailureMetadata>, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match metadata {
        Some(metadata) => metadata.serialize(serializer),
        None => serde_json::Map::new().serialize(serializer),
    }
}

fn deserialize_metadata<'de, D>(deserializer: D) -> std::result::Result<Option<FailureMetadata>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Object(map)) if map.is_empty() => Ok(None),
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

/// Whether a call changed the breaker state. The cascade (pause on open,
/// resume on close) runs only for `Transitioned`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionResult {
    Transitioned,
    NoTransition,
}

impl TransitionResult {
    pub fn transitioned(&self) -> bool {
        matches!(self, Self::Transitioned)
    }
}

impl From<bool> for TransitionResult {
    fn from(transitioned: bool) -> Self {
        if transitioned {
            Self::Transitioned
        } else {
            Self::NoTransition
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Circuit Breaker
// ═══════════════════════════════════════════════════════════════════════════════

/// The global breaker. Cheap to clone; all clones share the same store.
#[derive(Clone)]
pub struct CircuitBreaker {
    store: Arc<dyn BreakerStateStore>,
}

impl CircuitBreaker {
    pub fn new(store: Arc<dyn BreakerStateStore>) -> Self {
        Self { store }
    }

    /// Create the CLOSED record if none exists. Never resets an OPEN circuit.
    pub async fn initialize(&self) -> Result<()> {
        let created = self.store.initialize(Utc::now()).await?;
        if created {
            tracing::info!("Circuit breaker record created in CLOSED state");
        } else {
            tracing::debug!("Circuit breaker record already present");
        }
        Ok(())
    }

    /// Whether new dependency work may start. Fails closed: a missing record
    /// or an unreachable store both refuse.
    pub async fn should_allow_request(&self) -> bool {
        let allowed = match self.store.load().await {
            Ok(Some(record)) => record.state == CircuitState::Closed,
            Ok(None) => {
                tracing::error!("Circuit breaker record missing; refusing work");
                false
            }
            Err(e) => {
                e.log();
                false
            }
        };

        if !allowed {
            metrics::record_request_blocked();
        }
        allowed
    }

    /// Report a dependency failure. Any single failure opens the circuit.
    ///
    /// Metadata is always refreshed with this failure. Only the caller that
    /// actually moved the state from CLOSED to OPEN gets `Transitioned`;
    /// concurrent or later failures get `NoTransition`.
    pub async fn record_failure(&self, error: &str, error_type: &str) -> Result<TransitionResult> {
        metrics::record_dependency_failure(error_type);
        GuardEvent::FailureRecorded {
            error: error.to_string(),
            error_type: error_type.to_string(),
        }
        .log();

        let metadata = FailureMetadata::new(error, error_type, Utc::now());
        let opened = self.store.open(&metadata, metadata.failed_at).await?;

        if opened {
            metrics::record_transition(CircuitState::Open);
            GuardEvent::CircuitOpened {
                error: error.to_string(),
                error_type: error_type.to_string(),
            }
            .log();
        }
        Ok(opened.into())
    }

    /// Advisory only. Never changes state.
    pub fn record_success(&self) {
        metrics::record_dependency_success();
    }

    /// Operator close. Clears the failure metadata. Only the caller that
    /// moved the state from OPEN to CLOSED gets `Transitioned`.
    pub async fn manually_close_circuit(&self) -> Result<TransitionResult> {
        let closed = self.store.close(Utc::now()).await?;

        if closed {
            metrics::record_transition(CircuitState::Closed);
            GuardEvent::CircuitClosed.log();
        } else {
            tracing::info!("Close requested but circuit breaker was already closed");
        }
        Ok(closed.into())
    }

    /// Read the breaker state. Never fails: an unreadable store yields a
    /// degraded OPEN snapshot.
    pub async fn get_state(&self) -> CircuitBreakerSnapshot {
        match self.store.load().await {
            Ok(Some(record)) => {
                metrics::set_breaker_state(record.state);
                CircuitBreakerSnapshot::from_record(record)
            }
            Ok(None) => {
                tracing::warn!("Circuit breaker record missing; reporting degraded state");
                CircuitBreakerSnapshot::degraded()
            }
            Err(e) => {
                e.log();
                CircuitBreakerSnapshot::degraded()
            }
        }
    }

    /// Connectivity check for readiness probes.
    pub async fn ping(&self) -> Result<()> {
        self.store.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> (CircuitBreaker, InMemoryBreakerStore) {
        let store = InMemoryBreakerStore::new();
        (CircuitBreaker::new(Arc::new(store.clone())), store)
    }

    #[tokio::test]
    async fn test_initialize_then_allow() {
        let (breaker, _) = breaker();
        breaker.initialize().await.unwrap();
        assert!(breaker.should_allow_request().await);

        let state = breaker.get_state().await;
        assert_eq!(state.state, CircuitState::Closed);
        assert!(!state.degraded);
    }

    #[tokio::test]
    async fn test_single_failure_opens() {
        let (breaker, _) = breaker();
        breaker.initialize().await.unwrap();

        let result = breaker.record_failure("HTTP 503", "http").await.unwrap();
        assert_eq!(result, TransitionResult::Transitioned);
        assert!(!breaker.should_allow_request().await);

        let again = breaker.record_failure("HTTP 502", "http").await.unwrap();
        assert_eq!(again, TransitionResult::NoTransition);

        let state = breaker.get_state().await;
        assert_eq!(state.metadata.unwrap().last_error, "HTTP 502");
    }

    #[tokio::test]
    async fn test_success_never_closes() {
        let (breaker, _) = breaker();
        breaker.initialize().await.unwrap();
        breaker.record_failure("boom", "network").await.unwrap();

        for _ in 0..10 {
            breaker.record_success();
        }
        assert!(breaker.get_state().await.is_open());
    }

    #[tokio::test]
    async fn test_missing_record_refuses_work() {
        let (breaker, _) = breaker();
        assert!(!breaker.should_allow_request().await);

        let state = breaker.get_state().await;
        assert!(state.degraded);
        assert_eq!(state.state, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_store_outage_refuses_work() {
        let (breaker, store) = breaker();
        breaker.initialize().await.unwrap();
        store.set_unavailable(true);

        assert!(!breaker.should_allow_request().await);
        assert!(breaker.record_failure("x", "network").await.is_err());
        assert!(breaker.get_state().await.degraded);
    }

    #[test]
    fn test_snapshot_metadata_renders_empty_object() {
        let snapshot = CircuitBreakerSnapshot::from_record(BreakerRecord::closed());
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["state"], "closed");
        assert_eq!(json["metadata"], serde_json::json!({}));

        let back: CircuitBreakerSnapshot = serde_json::from_value(json).unwrap();
        assert!(back.metadata.is_none());
    }
}
