// src/core/browser.rs

//! Browser escalation collaborator.
//!
//! When the HTTP-only confidence is inconclusive the page is re-fetched
//! through a remote rendering service that executes JavaScript and returns
//! the final DOM. The service is behind the `Renderer` trait so the
//! escalation policy can be exercised with a fake in tests; every failure
//! here is recoverable and leaves the HTTP-only result standing.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("render request failed: {0}")]
    Transport(String),
    #[error("render service answered with status {0}")]
    Status(u16),
    #[error("render service reported: {0}")]
    Service(String),
}

/// Request body of the render call.
#[derive(Debug, Serialize)]
pub struct RenderRequest<'a> {
    pub url: &'a str,
    pub wait_until: &'a str,
    pub timeout_ms: u64,
}

/// Response body of the render call.
#[derive(Debug, Deserialize)]
pub struct RenderResponse {
    pub url: String,
    pub html: String,
    pub status_code: u16,
    #[serde(default)]
    pub error: Option<String>,
}

/// A fully rendered page as returned by the escalation service.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub html: String,
    pub status: u16,
}

/// One-method rendering capability.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, url: &str) -> Result<RenderedPage, RenderError>;
}

/// HTTP implementation talking to a `POST /render` service.
pub struct BrowserService {
    endpoint: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl BrowserService {
    /// Builds the render client. Renders take far longer than plain
    /// fetches, so the service gets its own timeout budget.
    pub fn new(endpoint: String, timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { endpoint, client, timeout })
    }
}

#[async_trait]
impl Renderer for BrowserService {
    async fn render(&self, url: &str) -> Result<RenderedPage, RenderError> {
        // The service kills the page load slightly before our own request
        // timeout would fire, so we get its error body instead of a cutoff.
        let page_budget_ms = self.timeout.as_millis().saturating_sub(5_000) as u64;
        let request = RenderRequest {
            url,
            wait_until: "networkidle",
            timeout_ms: page_budget_ms,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|err| RenderError::Transport(err.to_string()))?;

        if !response.status().is_success() {
            return Err(RenderError::Status(response.status().as_u16()));
        }

        let body: RenderResponse = response
            .json()
            .await
            .map_err(|err| RenderError::Transport(err.to_string()))?;

        if let Some(message) = body.error {
            return Err(RenderError::Service(message));
        }

        Ok(RenderedPage { html: body.html, status: body.status_code })
    }
}
