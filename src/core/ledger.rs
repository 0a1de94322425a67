// src/core/ledger.rs

//! Durable dedup ledger backed by SQLite.
//!
//! The ledger is the gate that guarantees at-most-once processing per
//! candidate URL. Workers `claim` a URL before issuing any network I/O;
//! the claim is an atomic upsert-if-absent, so under a concurrent pool
//! exactly one worker wins a given URL. The terminal outcome overwrites
//! the claim row once analysis finishes, and entries are never deleted
//! during a run.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;
use url::Url;

use crate::core::models::{DedupEntry, ScanOutcome};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("ledger row for {0} holds malformed data")]
    Malformed(String),
}

/// Aggregate counters over the whole ledger, for the end-of-run summary.
#[derive(Debug, Clone, Copy, Default)]
pub struct LedgerStats {
    pub total: u64,
    pub found: u64,
}

impl LedgerStats {
    pub fn found_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.found as f64 / self.total as f64 * 100.0
        }
    }
}

pub struct UrlLedger {
    conn: Mutex<Connection>,
}

const SCHEMA: &str = r"
    CREATE TABLE IF NOT EXISTS checked_urls (
        url_hash     TEXT PRIMARY KEY,
        url          TEXT NOT NULL,
        status       TEXT NOT NULL,
        confidence   INTEGER NOT NULL DEFAULT 0,
        method       TEXT NOT NULL DEFAULT 'http',
        phone_score  INTEGER NOT NULL DEFAULT 0,
        verify_score INTEGER NOT NULL DEFAULT 0,
        signatures   TEXT NOT NULL DEFAULT '[]',
        checked_at   TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_checked_urls_checked_at
    ON checked_urls(checked_at);
";

/// Status stored for a claimed-but-unfinished URL. Rows with this status
/// are swept on startup so a crashed run does not poison future runs.
const STATUS_PENDING: &str = "pending";

impl UrlLedger {
    /// Opens (or creates) the ledger database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let conn = Connection::open(path.as_ref())?;
        Self::initialize(conn)
    }

    /// In-memory ledger, used by tests.
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        Self::initialize(Connection::open_in_memory()?)
    }

    fn initialize(conn: Connection) -> Result<Self, LedgerError> {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Content-stable key for a URL: hex SHA-256 of its normalized form.
    pub fn url_hash(url: &str) -> String {
        let normalized = normalize_url(url);
        let digest = Sha256::digest(normalized.as_bytes());
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Atomically claims a URL for analysis.
    ///
    /// Returns `true` exactly once per URL key: the winning caller inserts
    /// a `pending` row and owns the analysis; every later caller (and every
    /// caller for an already-recorded URL) gets `false`.
    pub fn claim(&self, url: &str) -> Result<bool, LedgerError> {
        let conn = self.conn.lock().expect("ledger mutex poisoned");
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO checked_urls (url_hash, url, status, checked_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![Self::url_hash(url), url, STATUS_PENDING, Utc::now().to_rfc3339()],
        )?;
        Ok(inserted == 1)
    }

    /// Upserts the terminal outcome for a URL, replacing any claim row.
    pub fn record(&self, outcome: &ScanOutcome) -> Result<(), LedgerError> {
        let url = outcome.url();
        let (method, phone, verify, signatures) = match outcome {
            ScanOutcome::Analyzed(a) => (
                a.method.to_string(),
                a.phone_score,
                a.verify_score,
                serde_json::to_string(&a.signatures).unwrap_or_else(|_| "[]".to_string()),
            ),
            _ => ("http".to_string(), 0, 0, "[]".to_string()),
        };

        let conn = self.conn.lock().expect("ledger mutex poisoned");
        conn.execute(
            "INSERT OR REPLACE INTO checked_urls
             (url_hash, url, status, confidence, method, phone_score, verify_score, signatures, checked_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                Self::url_hash(url),
                url,
                outcome.status_label(),
                outcome.confidence(),
                method,
                phone,
                verify,
                signatures,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Whether the ledger holds any entry (pending or terminal) for a URL.
    pub fn exists(&self, url: &str) -> Result<bool, LedgerError> {
        let conn = self.conn.lock().expect("ledger mutex poisoned");
        let found = conn
            .query_row(
                "SELECT 1 FROM checked_urls WHERE url_hash = ?1",
                [Self::url_hash(url)],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Fetches the full ledger row for a URL.
    pub fn entry(&self, url: &str) -> Result<Option<DedupEntry>, LedgerError> {
        let conn = self.conn.lock().expect("ledger mutex poisoned");
        let row = conn
            .query_row(
                "SELECT url_hash, url, status, confidence, method, phone_score, verify_score,
                        signatures, checked_at
                 FROM checked_urls WHERE url_hash = ?1",
                [Self::url_hash(url)],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, i64>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, String>(8)?,
                    ))
                },
            )
            .optional()?;

        let Some((url_hash, url, status, confidence, method, phone, verify, signatures, checked_at)) = row
        else {
            return Ok(None);
        };

        let signatures: Vec<String> =
            serde_json::from_str(&signatures).map_err(|_| LedgerError::Malformed(url.clone()))?;
        let checked_at = DateTime::parse_from_rfc3339(&checked_at)
            .map_err(|_| LedgerError::Malformed(url.clone()))?
            .with_timezone(&Utc);

        Ok(Some(DedupEntry {
            url_hash,
            url,
            status,
            confidence: confidence.clamp(0, 100) as u8,
            method,
            phone_score: phone.clamp(0, 100) as u8,
            verify_score: verify.clamp(0, 100) as u8,
            signatures,
            checked_at,
        }))
    }

    /// Deletes claim rows left behind by a previous run that never finished.
    /// Called once at startup, before any worker runs.
    pub fn reset_pending(&self) -> Result<u64, LedgerError> {
        let conn = self.conn.lock().expect("ledger mutex poisoned");
        let swept = conn.execute(
            "DELETE FROM checked_urls WHERE status = ?1",
            [STATUS_PENDING],
        )?;
        Ok(swept as u64)
    }

    pub fn stats(&self, found_threshold: u8) -> Result<LedgerStats, LedgerError> {
        let conn = self.conn.lock().expect("ledger mutex poisoned");
        let total: i64 =
            conn.query_row("SELECT COUNT(*) FROM checked_urls", [], |row| row.get(0))?;
        let found: i64 = conn.query_row(
            "SELECT COUNT(*) FROM checked_urls WHERE confidence >= ?1",
            [found_threshold as i64],
            |row| row.get(0),
        )?;
        Ok(LedgerStats { total: total as u64, found: found as u64 })
    }
}

/// Canonical form of a URL for hashing. `Url::parse` lowercases the scheme
/// and host and resolves default ports; unparseable strings fall back to a
/// trimmed copy so they still dedup against themselves.
fn normalize_url(url: &str) -> String {
    match Url::parse(url.trim()) {
        Ok(parsed) => parsed.to_string(),
        Err(_) => url.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::{FetchMethod, PageAnalysis};

    fn analyzed(url: &str, confidence: u8) -> ScanOutcome {
        ScanOutcome::Analyzed(PageAnalysis {
            url: url.to_string(),
            http_status: 200,
            confidence,
            phone_score: confidence,
            verify_score: 0,
            method: FetchMethod::Http,
            signatures: vec!["twilio".to_string()],
            paths: vec![],
        })
    }

    #[test]
    fn claim_wins_exactly_once_per_url() {
        let ledger = UrlLedger::open_in_memory().unwrap();
        assert!(ledger.claim("https://example.com/signup").unwrap());
        assert!(!ledger.claim("https://example.com/signup").unwrap());
        // Distinct URL is a distinct key.
        assert!(ledger.claim("https://example.com/verify").unwrap());
    }

    #[test]
    fn record_then_exists_is_idempotent() {
        let ledger = UrlLedger::open_in_memory().unwrap();
        let outcome = analyzed("https://example.com", 70);

        ledger.record(&outcome).unwrap();
        assert!(ledger.exists("https://example.com").unwrap());

        ledger.record(&outcome).unwrap();
        assert!(ledger.exists("https://example.com").unwrap());

        let stats = ledger.stats(60).unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.found, 1);
    }

    #[test]
    fn record_overwrites_claim_row() {
        let ledger = UrlLedger::open_in_memory().unwrap();
        assert!(ledger.claim("https://example.com").unwrap());

        ledger.record(&analyzed("https://example.com", 85)).unwrap();
        let entry = ledger.entry("https://example.com").unwrap().unwrap();
        assert_eq!(entry.status, "analyzed");
        assert_eq!(entry.confidence, 85);
        assert_eq!(entry.method, "http");
        assert_eq!(entry.signatures, vec!["twilio".to_string()]);
    }

    #[test]
    fn normalization_makes_equivalent_urls_collide() {
        assert_eq!(
            UrlLedger::url_hash("HTTPS://Example.COM/signup"),
            UrlLedger::url_hash("https://example.com/signup"),
        );
        assert_ne!(
            UrlLedger::url_hash("https://example.com/signup"),
            UrlLedger::url_hash("https://example.com/verify"),
        );
    }

    #[test]
    fn reset_pending_sweeps_only_claims() {
        let ledger = UrlLedger::open_in_memory().unwrap();
        ledger.claim("https://stuck.example.com").unwrap();
        ledger.record(&analyzed("https://done.example.com", 10)).unwrap();

        assert_eq!(ledger.reset_pending().unwrap(), 1);
        assert!(!ledger.exists("https://stuck.example.com").unwrap());
        assert!(ledger.exists("https://done.example.com").unwrap());
        // The swept URL is claimable again.
        assert!(ledger.claim("https://stuck.example.com").unwrap());
    }

    #[test]
    fn stats_count_rows_and_findings() {
        let ledger = UrlLedger::open_in_memory().unwrap();
        ledger.record(&analyzed("https://a.com", 85)).unwrap();
        ledger.record(&analyzed("https://b.com", 40)).unwrap();
        ledger.record(&analyzed("https://c.com", 60)).unwrap();

        let stats = ledger.stats(60).unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.found, 2);
        assert!((stats.found_rate() - 66.7).abs() < 0.1);
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");

        {
            let ledger = UrlLedger::open(&path).unwrap();
            ledger.record(&analyzed("https://example.com", 70)).unwrap();
        }

        let reopened = UrlLedger::open(&path).unwrap();
        assert!(reopened.exists("https://example.com").unwrap());
    }
}
