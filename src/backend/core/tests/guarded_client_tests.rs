//! Guarded HTTP client against a mock third-party service.

mod common;

use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{jobs, Harness};
use leadguard_core::breaker::CircuitState;
use leadguard_core::error::ErrorCode;
use leadguard_core::guard::GuardedHttpClient;
use leadguard_core::jobs::JobStatus;

fn client(harness: &Harness) -> GuardedHttpClient {
    GuardedHttpClient::new(harness.guard.clone(), "enrichment", Duration::from_secs(2)).unwrap()
}

#[tokio::test]
async fn test_successful_call_keeps_circuit_closed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/leads/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": 42})))
        .expect(1)
        .mount(&server)
        .await;
    let harness = Harness::closed(jobs(JobStatus::Pending, 2)).await;

    let response = client(&harness)
        .get(&format!("{}/leads/42", server.uri()))
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
    assert!(harness.guard.breaker().should_allow_request().await);
    assert_eq!(harness.jobs.count_in(JobStatus::Pending), 2);
}

#[tokio::test]
async fn test_client_errors_are_not_dependency_failures() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let harness = Harness::closed(Vec::new()).await;

    let response = client(&harness)
        .get(&format!("{}/leads/missing", server.uri()))
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 404);
    assert!(harness.guard.breaker().should_allow_request().await);
}

#[tokio::test]
async fn test_server_error_opens_circuit_and_pauses_jobs() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/enrich"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;
    let harness = Harness::closed(jobs(JobStatus::Processing, 3)).await;

    let err = client(&harness)
        .post_json(
            &format!("{}/enrich", server.uri()),
            &serde_json::json!({"lead_id": 42}),
        )
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::DependencyFailure);
    let state = harness.guard.breaker().get_state().await;
    assert_eq!(state.state, CircuitState::Open);
    let metadata = state.metadata.unwrap();
    assert_eq!(metadata.last_error, "HTTP 503");
    assert_eq!(metadata.error_type, "enrichment");
    assert_eq!(harness.jobs.count_in(JobStatus::Paused), 3);
}

#[tokio::test]
async fn test_rate_limit_opens_circuit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;
    let harness = Harness::closed(Vec::new()).await;

    let err = client(&harness)
        .get(&format!("{}/search", server.uri()))
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::DependencyFailure);
    assert!(!harness.guard.breaker().should_allow_request().await);
}

#[tokio::test]
async fn test_open_circuit_blocks_outbound_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;
    let harness = Harness::closed(Vec::new()).await;
    let client = client(&harness);
    let url = format!("{}/search", server.uri());

    let first = client.get(&url).await.unwrap_err();
    let second = client.get(&url).await.unwrap_err();
    let third = client.get(&url).await.unwrap_err();

    assert_eq!(first.code(), ErrorCode::DependencyFailure);
    assert_eq!(second.code(), ErrorCode::CircuitOpen);
    assert_eq!(third.code(), ErrorCode::CircuitOpen);
    // the mock verifies on drop that only the first request reached it
}

#[tokio::test]
async fn test_transport_error_opens_circuit() {
    let harness = Harness::closed(Vec::new()).await;

    // nothing listens on port 1
    let err = client(&harness)
        .get("http://127.0.0.1:1/search")
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::DependencyFailure);
    let metadata = harness.guard.breaker().get_state().await.metadata.unwrap();
    assert!(metadata.last_error.starts_with("transport error"));
}
