// src/core/fetcher.rs

//! Pooled HTTP client, size-capped page fetches and proxy rotation.

use futures_util::StreamExt;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::config::{Settings, load_lines};

/// Failure taxonomy for a single page fetch. Each variant maps onto one
/// terminal scan outcome; none of them is retried within a pass.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("response body of {bytes} bytes exceeds the size cap")]
    Oversize { bytes: usize },
    #[error("fetch failed: {0}")]
    Other(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connection(err.to_string())
        } else {
            Self::Other(err.to_string())
        }
    }
}

/// A fetched page, body already read and checked against the size cap.
pub struct FetchedPage {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

/// Builds the pooled client shared by every worker.
///
/// Candidate domains are generated names with frequently broken TLS, so
/// certificate errors are tolerated. Redirects are followed because signup
/// pages commonly live behind one.
pub fn build_client(settings: &Settings, proxy: Option<&str>) -> reqwest::Result<reqwest::Client> {
    let mut default_headers = HeaderMap::new();
    default_headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    default_headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

    let mut builder = reqwest::Client::builder()
        .user_agent(settings.user_agent.clone())
        .timeout(Duration::from_secs(settings.timeout_secs))
        .default_headers(default_headers)
        .danger_accept_invalid_certs(true);

    if let Some(proxy_url) = proxy {
        builder = builder.proxy(reqwest::Proxy::all(proxy_url)?);
    }

    builder.build()
}

/// Issues one bounded GET and returns the decoded body.
///
/// An advertised `Content-Length` over `max_size` aborts before any body
/// bytes arrive; otherwise the body is streamed chunk by chunk and the
/// fetch aborts the moment the cap would be crossed, so a hostile server
/// can never buffer more than `max_size` into memory.
pub async fn fetch_page(
    client: &reqwest::Client,
    url: &str,
    max_size: usize,
) -> Result<FetchedPage, FetchError> {
    let response = client.get(url).send().await?;
    let status = response.status().as_u16();
    let headers = response.headers().clone();

    if let Some(len) = response.content_length()
        && len > max_size as u64
    {
        return Err(FetchError::Oversize { bytes: len as usize });
    }

    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if body.len() + chunk.len() > max_size {
            return Err(FetchError::Oversize { bytes: body.len() + chunk.len() });
        }
        body.extend_from_slice(&chunk);
    }

    Ok(FetchedPage {
        status,
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

/// Round-robin proxy selection with its own explicit cursor.
///
/// The rotation state lives in the rotator itself and is injected wherever
/// a proxy is needed, so rotation order is observable in tests and never
/// hides in module-level globals.
pub struct ProxyRotator {
    proxies: Vec<String>,
    rotate: bool,
    cursor: AtomicUsize,
}

impl ProxyRotator {
    pub fn new(proxies: Vec<String>, rotate: bool) -> Option<Self> {
        if proxies.is_empty() {
            return None;
        }
        Some(Self { proxies, rotate, cursor: AtomicUsize::new(0) })
    }

    /// Loads the proxy list configured in `settings`, if enabled. A missing
    /// or empty list file downgrades to direct connections with a warning.
    pub fn from_settings(settings: &Settings) -> Option<Self> {
        if !settings.proxy.enabled {
            return None;
        }
        let path: &Path = &settings.proxy.list_file;
        match load_lines(path) {
            Ok(proxies) if !proxies.is_empty() => Self::new(proxies, settings.proxy.rotate),
            Ok(_) => {
                warn!(file = %path.display(), "proxy list file is empty, continuing without proxies");
                None
            }
            Err(err) => {
                warn!(file = %path.display(), error = %err, "failed to load proxy list, continuing without proxies");
                None
            }
        }
    }

    /// Next proxy in rotation order; always the first entry when rotation
    /// is disabled.
    pub fn next(&self) -> &str {
        if !self.rotate {
            return &self.proxies[0];
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed);
        &self.proxies[index % self.proxies.len()]
    }
}
