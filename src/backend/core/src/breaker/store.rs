//! State store seam for the global breaker record.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{BreakerRecord, CircuitState, FailureMetadata};
use crate::error::{GuardError, Result};

/// Shared store holding the single breaker record.
///
/// `open` and `close` are atomic check-and-set operations: when several
/// writers race, exactly one of them observes the transition (`true`).
#[async_trait]
pub trait BreakerStateStore: Send + Sync {
    /// Create a CLOSED record if none exists. Never overwrites. Returns
    /// whether a record was created.
    async fn initialize(&self, now: DateTime<Utc>) -> Result<bool>;

    /// Read the current record; `None` if it is missing.
    async fn load(&self) -> Result<Option<BreakerRecord>>;

    /// Store `metadata` unconditionally and flip CLOSED (or missing) to OPEN.
    /// Returns `true` only for the writer that performed the flip.
    async fn open(&self, metadata: &FailureMetadata, now: DateTime<Utc>) -> Result<bool>;

    /// Flip OPEN (or missing) to CLOSED and clear the metadata. Returns
    /// `true` only for the writer that performed the flip.
    async fn close(&self, now: DateTime<Utc>) -> Result<bool>;

    /// Cheap connectivity check for readiness probes.
    async fn ping(&self) -> Result<()>;
}

/// Mutex-guarded breaker record for tests and single-process deployments.
#[derive(Clone, Default)]
pub struct InMemoryBreakerStore {
    record: Arc<Mutex<Option<BreakerRecord>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryBreakerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing record.
    pub fn with_record(record: BreakerRecord) -> Self {
        let store = Self::new();
        *store.record.lock() = Some(record);
        store
    }

    /// Simulate a store outage.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Drop the record, as an out-of-band reset would.
    pub fn clear(&self) {
        *self.record.lock() = None;
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(GuardError::state_store_unavailable(
                "in-memory breaker store marked unavailable",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl BreakerStateStore for InMemoryBreakerStore {
    async fn initialize(&self, _now: DateTime<Utc>) -> Result<bool> {
        self.check_available()?;

        let mut record = self.record.lock();
        if record.is_some() {
            return Ok(false);
        }
        *record = Some(BreakerRecord::closed());
        Ok(true)
    }

    async fn load(&self) -> Result<Option<BreakerRecord>> {
        self.check_available()?;
        Ok(self.record.lock().clone())
    }

    async fn open(&self, metadata: &FailureMetadata, now: DateTime<Utc>) -> Result<bool> {
        self.check_available()?;

        let mut guard = self.record.lock();
        if let Some(record) = guard.as_mut() {
            record.metadata = Some(metadata.clone());
            record.version += 1;
            if record.state == CircuitState::Open {
                return Ok(false);
            }
            record.state = CircuitState::Open;
            record.opened_at = Some(now);
            return Ok(true);
        }

        *guard = Some(BreakerRecord::opened(metadata.clone(), now));
        Ok(true)
    }

    async fn close(&self, now: DateTime<Utc>) -> Result<bool> {
        self.check_available()?;

        let mut guard = self.record.lock();
        if let Some(record) = guard.as_mut() {
            if record.state == CircuitState::Closed {
                return Ok(false);
            }
            record.state = CircuitState::Closed;
            record.closed_at = Some(now);
            record.metadata = None;
            record.version += 1;
            return Ok(true);
        }

        let mut record = BreakerRecord::closed();
        record.closed_at = Some(now);
        record.version = 1;
        *guard = Some(record);
        Ok(true)
    }

    async fn ping(&self) -> Result<()> {
        self.check_available()
    }
}
