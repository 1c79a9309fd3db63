//! HTTP client for the image generation API server.

use std::fmt;

use anyhow::{Context, Result};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Success envelope used by the server: `{ "success": true, "data": ... }`.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
}

/// Error envelope used by the server: `{ "success": false, "error": {...} }`.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
}

/// A non-success response from the API.
#[derive(Debug, Clone)]
pub struct ApiError {
    pub status: u16,
    /// Machine-readable code such as `JOB_NOT_FOUND`, when the body carried one
    pub code: Option<String>,
    pub message: String,
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }

    /// Whether the server reported a task that ran and failed.
    pub fn is_task_failure(&self) -> bool {
        self.code.as_deref() == Some("EXECUTION_FAILED")
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "API error ({} {}): {}", self.status, code, self.message),
            None => write!(f, "API error ({}): {}", self.status, self.message),
        }
    }
}

impl std::error::Error for ApiError {}

/// HTTP client for the image generation API.
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

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Perform a GET request and unwrap the `data` field.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        let resp = send(self.client.get(&url), "GET", &url).await?;
        unwrap_data(resp, &url).await
    }

    /// Perform a POST request with a JSON body and unwrap the `data` field.
    pub async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let url = self.url(path);
        let resp = send(self.client.post(&url).json(body), "POST", &url).await?;
        unwrap_data(resp, &url).await
    }

    /// Perform a DELETE request and unwrap the `data` field.
    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        let resp = send(self.client.delete(&url), "DELETE", &url).await?;
        unwrap_data(resp, &url).await
    }

    /// Perform a GET request and return the body as-is (health is not wrapped).
    pub async fn get_raw(&self, path: &str) -> Result<serde_json::Value> {
        let url = self.url(path);
        let resp = send(self.client.get(&url), "GET", &url).await?;
        resp.json()
            .await
            .with_context(|| format!("Failed to parse response from {}", url))
    }
}

async fn send(request: RequestBuilder, method: &str, url: &str) -> Result<Response> {
    let resp = request
        .send()
        .await
        .with_context(|| format!("{} {} failed", method, url))?;

    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    let error = match serde_json::from_str::<ErrorEnvelope>(&body) {
        Ok(envelope) => ApiError {
            status: status.as_u16(),
            code: Some(envelope.error.code),
            message: envelope.error.message,
        },
        Err(_) => ApiError {
            status: status.as_u16(),
            code: None,
            message: body,
        },
    };
    Err(error.into())
}

async fn unwrap_data<T: DeserializeOwned>(resp: Response, url: &str) -> Result<T> {
    let api_resp: ApiResponse<T> = resp
        .json()
        .await
        .with_context(|| format!("Failed to parse response from {}", url))?;

    match (api_resp.success, api_resp.data) {
        (true, Some(data)) => Ok(data),
        (true, None) => anyhow::bail!("API returned success but no data"),
        (false, _) => anyhow::bail!("API reported failure without an error body"),
    }
}
