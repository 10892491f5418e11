//! Tests for the global circuit breaker.
//!
//! Tests cover:
//! - Bootstrap and the CLOSED -> OPEN -> CLOSED lifecycle
//! - Immediate open on a single failure
//! - Metadata refresh while already open
//! - Fail-safe behaviour with a missing record or an unreachable store
//! - Concurrent writers racing for a transition


use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;

use leadguard_core::breaker::{
    BreakerRecord, BreakerStateStore, CircuitBreaker, CircuitState, FailureMetadata,
    InMemoryBreakerStore, TransitionResult,
};
use leadguard_core::error::ErrorCode;

fn breaker() -> (CircuitBreaker, InMemoryBreakerStore) {
    let store = InMemoryBreakerStore::new();
    (CircuitBreaker::new(Arc::new(store.clone())), store)
}

// ============================================================================
// Lifecycle Tests
// ============================================================================

#[tokio::test]
async fn test_initial_state_is_closed() {
    let (breaker, _) = breaker();
    breaker.initialize().await.unwrap();

    let state = breaker.get_state().await;
    assert_eq!(state.state, CircuitState::Closed);
    assert!(state.opened_at.is_none());
    assert!(state.closed_at.is_none());
    assert!(state.metadata.is_none());
    assert!(!state.degraded);
    assert!(breaker.should_allow_request().await);
}

#[tokio::test]
async fn test_initialize_does_not_reset_open_circuit() {
    let (breaker, _) = breaker();
    breaker.initialize().await.unwrap();
    breaker.record_failure("timeout", "network").await.unwrap();

    // a second process bootstrapping must not close the circuit
    breaker.initialize().await.unwrap();
    assert_eq!(breaker.get_state().await.state, CircuitState::Open);
}

#[tokio::test]
async fn test_single_failure_opens_immediately() {
    let (breaker, _) = breaker();
    breaker.initialize().await.unwrap();

    let result = breaker.record_failure("timeout", "network").await.unwrap();

    assert_eq!(result, TransitionResult::Transitioned);
    let state = breaker.get_state().await;
    assert_eq!(state.state, CircuitState::Open);
    assert!(state.opened_at.is_some());
    let metadata = state.metadata.unwrap();
    assert_eq!(metadata.last_error, "timeout");
    assert_eq!(metadata.error_type, "network");
    assert!(!breaker.should_allow_request().await);
}

#[tokio::test]
async fn test_failure_while_open_updates_metadata_only() {
    let (breaker, _) = breaker();
    breaker.initialize().await.unwrap();
    breaker.record_failure("timeout", "network").await.unwrap();
    let opened_at = breaker.get_state().await.opened_at;

    let result = breaker.record_failure("auth", "4xx").await.unwrap();

    assert_eq!(result, TransitionResult::NoTransition);
    let state = breaker.get_state().await;
    assert_eq!(state.state, CircuitState::Open);
    assert_eq!(state.opened_at, opened_at);
    let metadata = state.metadata.unwrap();
    assert_eq!(metadata.last_error, "auth");
    assert_eq!(metadata.error_type, "4xx");
}

#[tokio::test]
async fn test_success_never_closes_circuit() {
    let (breaker, _) = breaker();
    breaker.initialize().await.unwrap();
    breaker.record_failure("timeout", "network").await.unwrap();

    for _ in 0..100 {
        breaker.record_success();
    }

    assert_eq!(breaker.get_state().await.state, CircuitState::Open);
    assert!(!breaker.should_allow_request().await);
}

#[tokio::test]
async fn test_manual_close_clears_metadata() {
    let (breaker, _) = breaker();
    breaker.initialize().await.unwrap();
    breaker.record_failure("timeout", "network").await.unwrap();

    let result = breaker.manually_close_circuit().await.unwrap();

    assert_eq!(result, TransitionResult::Transitioned);
    let state = breaker.get_state().await;
    assert_eq!(state.state, CircuitState::Closed);
    assert!(state.closed_at.is_some());
    assert!(state.metadata.is_none());
    assert!(breaker.should_allow_request().await);
}

#[tokio::test]
async fn test_close_when_closed_is_noop() {
    let (breaker, _) = breaker();
    breaker.initialize().await.unwrap();

    let result = breaker.manually_close_circuit().await.unwrap();

    assert_eq!(result, TransitionResult::NoTransition);
    assert!(breaker.get_state().await.closed_at.is_none());
}

#[tokio::test]
async fn test_reopen_after_close() {
    let (breaker, _) = breaker();
    breaker.initialize().await.unwrap();

    assert!(breaker.record_failure("a", "network").await.unwrap().transitioned());
    assert!(breaker.manually_close_circuit().await.unwrap().transitioned());
    assert!(breaker.record_failure("b", "network").await.unwrap().transitioned());

    let state = breaker.get_state().await;
    assert_eq!(state.state, CircuitState::Open);
    assert!(state.closed_at.is_some());
    assert_eq!(state.metadata.unwrap().last_error, "b");
}

// ============================================================================
// Fail-Safe Tests
// ============================================================================

#[tokio::test]
async fn test_p5_store_outage_blocks_requests() {
    let (breaker, store) = breaker();
    breaker.initialize().await.unwrap();
    assert!(breaker.should_allow_request().await);

    store.set_unavailable(true);

    // last known state was CLOSED, yet nothing is allowed through
    assert!(!breaker.should_allow_request().await);

    store.set_unavailable(false);
    assert!(breaker.should_allow_request().await);
}

#[tokio::test]
async fn test_store_outage_surfaces_on_transitions() {
    let (breaker, store) = breaker();
    breaker.initialize().await.unwrap();
    store.set_unavailable(true);

    let err = breaker.record_failure("timeout", "network").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::StateStoreUnavailable);
    assert!(err.is_retryable());

    let err = breaker.manually_close_circuit().await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::StateStoreUnavailable);

    // the failed write changed nothing
    store.set_unavailable(false);
    assert_eq!(breaker.get_state().await.state, CircuitState::Closed);
}

#[tokio::test]
async fn test_missing_record_is_not_closed() {
    let (breaker, store) = breaker();
    breaker.initialize().await.unwrap();
    store.clear();

    assert!(!breaker.should_allow_request().await);
    let state = breaker.get_state().await;
    assert!(state.degraded);
    assert_eq!(state.state, CircuitState::Open);
}

#[tokio::test]
async fn test_degraded_snapshot_on_outage() {
    let (breaker, store) = breaker();
    breaker.initialize().await.unwrap();
    store.set_unavailable(true);

    let state = breaker.get_state().await;
    assert!(state.degraded);
    assert_eq!(state.state, CircuitState::Open);
    assert!(state.opened_at.is_none());
}

#[tokio::test]
async fn test_failure_on_missing_record_transitions() {
    let (breaker, _) = breaker();

    let result = breaker.record_failure("timeout", "network").await.unwrap();

    assert_eq!(result, TransitionResult::Transitioned);
    assert!(!breaker.get_state().await.degraded);
}

#[tokio::test]
async fn test_existing_record_is_respected() {
    let record = BreakerRecord::opened(
        FailureMetadata::new("quota exceeded", "429", Utc::now()),
        Utc::now(),
    );
    let store = InMemoryBreakerStore::with_record(record);
    let breaker = CircuitBreaker::new(Arc::new(store.clone()));

    breaker.initialize().await.unwrap();

    assert!(!breaker.should_allow_request().await);
    assert_eq!(
        store.load().await.unwrap().unwrap().metadata.unwrap().error_type,
        "429"
    );
}

// ============================================================================
// Concurrency Tests
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_failures_single_winner() {
    let (breaker, _) = breaker();
    breaker.initialize().await.unwrap();

    let tasks = (0..64).map(|i| {
        let breaker = breaker.clone();
        tokio::spawn(async move {
            breaker
                .record_failure(&format!("failure {}", i), "network")
                .await
                .unwrap()
        })
    });

    let results: Vec<TransitionResult> = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let winners = results.iter().filter(|r| r.transitioned()).count();
    assert_eq!(winners, 1);
    assert_eq!(breaker.get_state().await.state, CircuitState::Open);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_closes_single_winner() {
    let (breaker, _) = breaker();
    breaker.initialize().await.unwrap();
    breaker.record_failure("timeout", "network").await.unwrap();

    let tasks = (0..32).map(|_| {
        let breaker = breaker.clone();
        tokio::spawn(async move { breaker.manually_close_circuit().await.unwrap() })
    });

    let winners = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .filter(|r| r.transitioned())
        .count();

    assert_eq!(winners, 1);
}
