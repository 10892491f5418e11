//! HTTP client for third-party services, routed through the guard.

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use std::time::Duration;

use super::PipelineGuard;
use crate::error::Result;

/// reqwest client whose every request passes the breaker gate and reports
/// its outcome. Transport errors, 5xx and 429 count as dependency failures.
#[derive(Clone)]
pub struct GuardedHttpClient {
    guard: PipelineGuard,
    client: Client,
    service: String,
}

impl GuardedHttpClient {
    pub fn new(guard: PipelineGuard, service: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            guard,
            client,
            service: service.into(),
        })
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub async fn get(&self, url: &str) -> Result<Response> {
        self.send(self.client.get(url)).await
    }

    pub async fn post_json<B: Serialize + ?Sized>(&self, url: &str, body: &B) -> Result<Response> {
        self.send(self.client.post(url).json(body)).await
    }

    /// Send a prepared request through the guard.
    pub async fn send(&self, request: RequestBuilder) -> Result<Response> {
        self.guard
            .call(&self.service, async move {
                let response = request
                    .send()
                    .await
                    .map_err(|e| format!("transport error: {}", e))?;

                let status = response.status();
                if is_dependency_failure(status) {
                    return Err(format!("HTTP {}", status.as_u16()));
                }
                Ok::<Response, String>(response)
            })
            .await
    }
}

fn is_dependency_failure(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}
