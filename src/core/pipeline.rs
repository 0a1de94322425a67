// src/core/pipeline.rs

//! Worker pool wiring: bounded candidate queue in, found pages out.

use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::core::analyzer::UrlAnalyzer;
use crate::core::ledger::UrlLedger;
use crate::core::models::{PageAnalysis, ScanOutcome};

/// Aggregate counters for one pipeline run.
#[derive(Debug, Default, Clone, Copy)]
pub struct PipelineReport {
    /// URLs that went through the full analyze-and-record path.
    pub checked: u64,
    /// Analyzed URLs at or above the confidence threshold.
    pub found: u64,
    /// URLs skipped because the ledger already held them.
    pub duplicates: u64,
    /// Ledger write failures and analyzer panics.
    pub failures: u64,
}

impl PipelineReport {
    fn merge(&mut self, other: PipelineReport) {
        self.checked += other.checked;
        self.found += other.found;
        self.duplicates += other.duplicates;
        self.failures += other.failures;
    }
}

/// Drives N workers over a shared candidate queue.
///
/// Every worker claims a URL in the ledger before any network traffic, so
/// two workers racing on the same URL can never both analyze it.
pub struct Pipeline {
    analyzer: Arc<dyn UrlAnalyzer>,
    ledger: Arc<UrlLedger>,
    settings: Arc<Settings>,
}

impl Pipeline {
    pub fn new(
        analyzer: Arc<dyn UrlAnalyzer>,
        ledger: Arc<UrlLedger>,
        settings: Arc<Settings>,
    ) -> Self {
        Self { analyzer, ledger, settings }
    }

    /// Runs until the candidate queue closes or the token is cancelled.
    ///
    /// Cancellation stops dequeues and abandons in-flight analyses; their
    /// pending claims are swept by `reset_pending` on the next startup.
    pub async fn run(
        &self,
        candidates: mpsc::Receiver<String>,
        found_tx: mpsc::Sender<PageAnalysis>,
        cancel: CancellationToken,
    ) -> PipelineReport {
        let candidates = Arc::new(Mutex::new(candidates));
        let mut handles = Vec::with_capacity(self.settings.workers);

        for worker_id in 0..self.settings.workers {
            let candidates = Arc::clone(&candidates);
            let analyzer = Arc::clone(&self.analyzer);
            let ledger = Arc::clone(&self.ledger);
            let settings = Arc::clone(&self.settings);
            let found_tx = found_tx.clone();
            let cancel = cancel.clone();

            handles.push(tokio::spawn(async move {
                worker_loop(worker_id, candidates, analyzer, ledger, settings, found_tx, cancel)
                    .await
            }));
        }

        let mut report = PipelineReport::default();
        for handle in handles {
            match handle.await {
                Ok(worker_report) => report.merge(worker_report),
                Err(err) => {
                    error!(error = %err, "worker task aborted");
                    report.failures += 1;
                }
            }
        }
        report
    }
}

async fn worker_loop(
    worker_id: usize,
    candidates: Arc<Mutex<mpsc::Receiver<String>>>,
    analyzer: Arc<dyn UrlAnalyzer>,
    ledger: Arc<UrlLedger>,
    settings: Arc<Settings>,
    found_tx: mpsc::Sender<PageAnalysis>,
    cancel: CancellationToken,
) -> PipelineReport {
    let mut report = PipelineReport::default();

    loop {
        // The receiver lock is held only for the dequeue itself.
        let url = {
            let mut rx = candidates.lock().await;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                url = rx.recv() => url,
            }
        };
        let Some(url) = url else { break };

        // Claim before any network traffic; losing the claim means another
        // worker or a previous run already owns this URL.
        match ledger.claim(&url) {
            Ok(true) => {}
            Ok(false) => {
                report.duplicates += 1;
                info!(
                    worker = worker_id,
                    "{}",
                    ScanOutcome::Duplicate { url }.classification(settings.confidence_threshold)
                );
                continue;
            }
            Err(err) => {
                report.failures += 1;
                error!(worker = worker_id, url = %url, error = %err, "ledger claim failed, skipping URL");
                continue;
            }
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            outcome = analyzer.analyze(&url) => outcome,
        };
        report.checked += 1;

        if let Err(err) = ledger.record(&outcome) {
            report.failures += 1;
            error!(worker = worker_id, url = %url, error = %err, "ledger write failed");
        }

        info!(worker = worker_id, "{}", outcome.classification(settings.confidence_threshold));

        if let ScanOutcome::Analyzed(analysis) = outcome
            && analysis.confidence >= settings.confidence_threshold
        {
            report.found += 1;
            if found_tx.send(analysis).await.is_err() {
                warn!(worker = worker_id, "found channel closed, finding dropped");
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::FetchMethod;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns a fixed confidence for every URL and counts invocations.
    struct StubAnalyzer {
        confidence: u8,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl UrlAnalyzer for StubAnalyzer {
        async fn analyze(&self, url: &str) -> ScanOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ScanOutcome::Analyzed(PageAnalysis {
                url: url.to_string(),
                http_status: 200,
                confidence: self.confidence,
                phone_score: self.confidence,
                verify_score: 0,
                method: FetchMethod::Http,
                signatures: vec![],
                paths: vec![],
            })
        }
    }

    fn pipeline_with(confidence: u8, calls: Arc<AtomicUsize>) -> Pipeline {
        let analyzer = Arc::new(StubAnalyzer { confidence, calls });
        let ledger = Arc::new(UrlLedger::open_in_memory().unwrap());
        let settings = Arc::new(Settings::default());
        Pipeline::new(analyzer, ledger, settings)
    }

    #[tokio::test]
    async fn drains_queue_and_counts_findings() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = pipeline_with(90, Arc::clone(&calls));

        let (tx, rx) = mpsc::channel(16);
        let (found_tx, mut found_rx) = mpsc::channel(16);
        for url in ["https://a.com", "https://b.com", "https://c.com"] {
            tx.send(url.to_string()).await.unwrap();
        }
        drop(tx);

        let report = pipeline.run(rx, found_tx, CancellationToken::new()).await;
        assert_eq!(report.checked, 3);
        assert_eq!(report.found, 3);
        assert_eq!(report.duplicates, 0);

        let mut found = Vec::new();
        while let Some(analysis) = found_rx.recv().await {
            found.push(analysis.url);
        }
        assert_eq!(found.len(), 3);
    }

    #[tokio::test]
    async fn duplicate_urls_are_analyzed_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = pipeline_with(90, Arc::clone(&calls));

        let (tx, rx) = mpsc::channel(16);
        let (found_tx, _found_rx) = mpsc::channel(16);
        for _ in 0..4 {
            tx.send("https://dup.com".to_string()).await.unwrap();
        }
        drop(tx);

        let report = pipeline.run(rx, found_tx, CancellationToken::new()).await;
        assert_eq!(report.checked, 1);
        assert_eq!(report.duplicates, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn low_confidence_is_checked_but_not_found() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = pipeline_with(10, Arc::clone(&calls));

        let (tx, rx) = mpsc::channel(16);
        let (found_tx, mut found_rx) = mpsc::channel(16);
        tx.send("https://quiet.com".to_string()).await.unwrap();
        drop(tx);

        let report = pipeline.run(rx, found_tx, CancellationToken::new()).await;
        assert_eq!(report.checked, 1);
        assert_eq!(report.found, 0);
        assert!(found_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn cancellation_stops_dequeues() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = pipeline_with(90, Arc::clone(&calls));

        let cancel = CancellationToken::new();
        cancel.cancel();

        let (tx, rx) = mpsc::channel(16);
        let (found_tx, _found_rx) = mpsc::channel(16);
        tx.send("https://never.com".to_string()).await.unwrap();
        drop(tx);

        let report = pipeline.run(rx, found_tx, cancel).await;
        assert_eq!(report.checked, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
