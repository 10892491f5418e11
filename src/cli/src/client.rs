//! HTTP client for the Leadguard API server.

use anyhow::{Context, Result};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// Success envelope returned by the server's JSON endpoints.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

/// Error body returned for failed requests.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorInfo,
}

#[derive(Debug, Deserialize)]
struct ErrorInfo {
    code: String,
    message: String,
}

/// HTTP client for the Leadguard API.
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Create a new API client pointing at the given base URL.
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Return the configured base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET and unwrap the response envelope.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;

        unwrap_envelope(check_status(resp).await?, &url).await
    }

    /// POST without a body and unwrap the response envelope.
    pub async fn post<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .post(&url)
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?;

        unwrap_envelope(check_status(resp).await?, &url).await
    }

    /// GET a plain JSON document (health endpoints have no envelope).
    ///
    /// Returns the status code alongside the body since readiness reports
    /// "not ready" with a 503 and a meaningful body.
    pub async fn get_raw(&self, path: &str) -> Result<(u16, serde_json::Value)> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;

        let status = resp.status().as_u16();
        let body = resp
            .json()
            .await
            .with_context(|| format!("Failed to parse response from {}", url))?;
        Ok((status, body))
    }
}

async fn check_status(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorBody>(&body) {
        Ok(err) => anyhow::bail!("{} ({}, HTTP {})", err.error.message, err.error.code, status.as_u16()),
        Err(_) => anyhow::bail!("API error ({}): {}", status, body),
    }
}

async fn unwrap_envelope<T: DeserializeOwned>(resp: Response, url: &str) -> Result<T> {
    let api_resp: ApiResponse<T> = resp
        .json()
        .await
        .with_context(|| format!("Failed to parse response from {}", url))?;

    if api_resp.success {
        api_resp
            .data
            .ok_or_else(|| anyhow::anyhow!("API returned success but no data"))
    } else {
        Err(anyhow::anyhow!(
            "API error: {}",
            api_resp.error.unwrap_or_else(|| "Unknown error".into())
        ))
    }
}
