//! Breaker Lua scripts against a real Redis.
//!
//! Run with `LEADGUARD_TEST_REDIS_URL=redis://127.0.0.1:6379 cargo test -- --ignored`.

use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;

use leadguard_core::breaker::{
    BreakerStateStore, CircuitBreaker, CircuitState, FailureMetadata, RedisBreakerStore,
};

fn live_redis_url() -> Option<String> {
    std::env::var("LEADGUARD_TEST_REDIS_URL")
        .ok()
        .filter(|url| !url.trim().is_empty())
}

/// Store on a fresh key, plus a client for inspecting the raw hash.
fn store(url: &str) -> (RedisBreakerStore, redis::Client) {
    let client = redis::Client::open(url).unwrap();
    let key = format!("leadguard:test:breaker:{}", uuid::Uuid::new_v4());
    (
        RedisBreakerStore::new(client.clone(), key, Duration::from_secs(2)),
        client,
    )
}

async fn cleanup(client: &redis::Client, key: &str) {
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    let _: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await.unwrap();
}

fn failure(error: &str) -> FailureMetadata {
    FailureMetadata::new(error, "network", Utc::now())
}

#[tokio::test]
#[ignore = "requires live redis server"]
async fn test_init_creates_closed_record_once() {
    let Some(url) = live_redis_url() else {
        eprintln!("skip: set LEADGUARD_TEST_REDIS_URL");
        return;
    };
    let (store, client) = store(&url);

    assert!(store.initialize(Utc::now()).await.unwrap());
    assert!(!store.initialize(Utc::now()).await.unwrap());

    let record = store.load().await.unwrap().unwrap();
    assert_eq!(record.state, CircuitState::Closed);
    assert_eq!(record.version, 0);
    assert!(record.metadata.is_none());

    // no TTL on the record
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    let ttl: i64 = redis::cmd("TTL").arg(store.key()).query_async(&mut conn).await.unwrap();
    assert_eq!(ttl, -1);

    cleanup(&client, store.key()).await;
}

#[tokio::test]
#[ignore = "requires live redis server"]
async fn test_open_script_transitions_once_and_refreshes_metadata() {
    let Some(url) = live_redis_url() else {
        eprintln!("skip: set LEADGUARD_TEST_REDIS_URL");
        return;
    };
    let (store, client) = store(&url);
    store.initialize(Utc::now()).await.unwrap();

    assert!(store.open(&failure("timeout"), Utc::now()).await.unwrap());
    let first = store.load().await.unwrap().unwrap();

    assert!(!store.open(&failure("HTTP 503"), Utc::now()).await.unwrap());
    let second = store.load().await.unwrap().unwrap();

    assert_eq!(second.state, CircuitState::Open);
    assert_eq!(second.opened_at, first.opened_at);
    assert_eq!(second.metadata.unwrap().last_error, "HTTP 503");
    assert_eq!(second.version, first.version + 1);

    cleanup(&client, store.key()).await;
}

#[tokio::test]
#[ignore = "requires live redis server"]
async fn test_close_script_clears_metadata_and_is_idempotent() {
    let Some(url) = live_redis_url() else {
        eprintln!("skip: set LEADGUARD_TEST_REDIS_URL");
        return;
    };
    let (store, client) = store(&url);
    store.initialize(Utc::now()).await.unwrap();
    store.open(&failure("timeout"), Utc::now()).await.unwrap();

    assert!(store.close(Utc::now()).await.unwrap());
    assert!(!store.close(Utc::now()).await.unwrap());

    let record = store.load().await.unwrap().unwrap();
    assert_eq!(record.state, CircuitState::Closed);
    assert!(record.closed_at.is_some());
    assert!(record.opened_at.is_some());
    assert!(record.metadata.is_none());

    cleanup(&client, store.key()).await;
}

#[tokio::test]
#[ignore = "requires live redis server"]
async fn test_concurrent_opens_have_one_winner() {
    let Some(url) = live_redis_url() else {
        eprintln!("skip: set LEADGUARD_TEST_REDIS_URL");
        return;
    };
    let (store, client) = store(&url);
    let key = store.key().to_string();
    let breaker = CircuitBreaker::new(Arc::new(store));
    breaker.initialize().await.unwrap();

    let results = join_all((0..25).map(|i| {
        let breaker = breaker.clone();
        tokio::spawn(async move {
            breaker
                .record_failure(&format!("failure {}", i), "network")
                .await
                .unwrap()
        })
    }))
    .await;

    let winners = results
        .into_iter()
        .map(|r| r.unwrap())
        .filter(|t| t.transitioned())
        .count();
    assert_eq!(winners, 1);
    assert!(!breaker.should_allow_request().await);

    cleanup(&client, &key).await;
}
