// src/core/models.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

/// How the page content that produced a score was obtained.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FetchMethod {
    /// Plain HTTP fetch through the pooled client.
    Http,
    /// Full render through the browser escalation service.
    Browser,
}

/// Kind of bot wall detected on a page before scoring.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProtectionKind {
    Cloudflare,
    Captcha,
}

/// A sub-path probe that scored above the reporting bar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathHit {
    pub url: String,
    pub score: u16,
    pub title: String,
}

/// Full scoring detail for a page that made it through every analyzer gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageAnalysis {
    pub url: String,
    pub http_status: u16,
    pub confidence: u8,
    pub phone_score: u8,
    pub verify_score: u8,
    pub method: FetchMethod,
    pub signatures: Vec<String>,
    pub paths: Vec<PathHit>,
}

/// Terminal result of processing one candidate URL.
///
/// Every variant is terminal: a worker produces exactly one `ScanOutcome`
/// per URL and writes it to the ledger. Only `Analyzed` carries scores;
/// every other variant has an implicit confidence of zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScanOutcome {
    /// The ledger already holds an entry for this URL; no fetch was issued.
    Duplicate { url: String },
    /// An exclusion keyword was found in the raw HTML.
    Excluded { url: String, keyword: String },
    /// A bot wall or CAPTCHA was detected before scoring.
    Protected { url: String, kind: ProtectionKind },
    /// The response body exceeded the configured size cap; nothing was parsed.
    Oversize { url: String, bytes: usize },
    /// The fetch timed out.
    Timeout { url: String },
    /// DNS failure or connection refusal.
    ConnectionError { url: String },
    /// Any other unexpected failure during analysis.
    Error { url: String, message: String },
    /// The page was fetched and fully scored.
    Analyzed(PageAnalysis),
}

impl ScanOutcome {
    pub fn url(&self) -> &str {
        match self {
            Self::Duplicate { url }
            | Self::Excluded { url, .. }
            | Self::Protected { url, .. }
            | Self::Oversize { url, .. }
            | Self::Timeout { url }
            | Self::ConnectionError { url }
            | Self::Error { url, .. } => url,
            Self::Analyzed(analysis) => &analysis.url,
        }
    }

    /// Combined confidence; zero for every non-analyzed variant.
    pub fn confidence(&self) -> u8 {
        match self {
            Self::Analyzed(analysis) => analysis.confidence,
            _ => 0,
        }
    }

    /// Stable tag stored in the ledger's `status` column.
    pub fn status_label(&self) -> &'static str {
        match self {
            Self::Duplicate { .. } => "duplicate",
            Self::Excluded { .. } => "excluded",
            Self::Protected { .. } => "protected",
            Self::Oversize { .. } => "oversize",
            Self::Timeout { .. } => "timeout",
            Self::ConnectionError { .. } => "connection_error",
            Self::Error { .. } => "error",
            Self::Analyzed(_) => "analyzed",
        }
    }

    /// One-line classification for streaming progress output.
    pub fn classification(&self, found_threshold: u8) -> String {
        match self {
            Self::Duplicate { url } => format!("duplicate        {url}"),
            Self::Excluded { url, keyword } => format!("excluded ({keyword})  {url}"),
            Self::Protected { url, kind } => format!("protected ({kind})  {url}"),
            Self::Oversize { url, bytes } => format!("oversize ({bytes} bytes)  {url}"),
            Self::Timeout { url } => format!("timeout          {url}"),
            Self::ConnectionError { url } => format!("connection error {url}"),
            Self::Error { url, message } => format!("error ({message})  {url}"),
            Self::Analyzed(a) if a.confidence >= found_threshold => format!(
                "found  {}% (phone {}, verify {})  {}",
                a.confidence, a.phone_score, a.verify_score, a.url
            ),
            Self::Analyzed(a) => format!("low confidence {}%  {}", a.confidence, a.url),
        }
    }
}

/// A row of the dedup ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupEntry {
    pub url_hash: String,
    pub url: String,
    pub status: String,
    pub confidence: u8,
    pub method: String,
    pub phone_score: u8,
    pub verify_score: u8,
    pub signatures: Vec<String>,
    pub checked_at: DateTime<Utc>,
}
