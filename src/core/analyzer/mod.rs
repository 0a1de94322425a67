// src/core/analyzer/mod.rs

//! Per-URL analysis: HTTP fetch first, browser render when inconclusive.

pub mod heuristics;
pub mod path_fuzzer;
pub mod signatures;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use self::heuristics::{
    ContentVerdict, PageScores, analyze_content, calculate_confidence, detect_js_requirement,
    score_page,
};
use self::path_fuzzer::check_paths;
use crate::config::Settings;
use crate::core::browser::Renderer;
use crate::core::fetcher::{FetchError, fetch_page};
use crate::core::models::{FetchMethod, PageAnalysis, ScanOutcome};

/// The unit of work the scheduler drives: one URL in, one terminal
/// outcome out. Implemented by `HybridAnalyzer` and by stubs in tests.
#[async_trait]
pub trait UrlAnalyzer: Send + Sync {
    async fn analyze(&self, url: &str) -> ScanOutcome;
}

/// Combines the cheap HTTP fetch with the on-demand browser escalation
/// and the path fuzzer.
pub struct HybridAnalyzer {
    client: reqwest::Client,
    settings: Arc<Settings>,
    renderer: Option<Arc<dyn Renderer>>,
}

impl HybridAnalyzer {
    pub fn new(
        client: reqwest::Client,
        settings: Arc<Settings>,
        renderer: Option<Arc<dyn Renderer>>,
    ) -> Self {
        Self { client, settings, renderer }
    }

    /// Whether the browser render should run for an HTTP-only confidence.
    fn should_escalate(&self, confidence: u8) -> bool {
        self.renderer.is_some() && confidence < self.settings.fallback_threshold
    }

    /// Runs the render escalation and rescoring. Any failure leaves the
    /// HTTP-only result standing.
    async fn escalate(&self, url: &str) -> Option<PageScores> {
        let renderer = self.renderer.as_ref()?;
        match renderer.render(url).await {
            Ok(page) => {
                debug!(url, status = page.status, "browser render succeeded, rescoring");
                Some(score_page(&page.html, &self.settings.keywords, &self.settings.weights))
            }
            Err(err) => {
                warn!(url, error = %err, "browser escalation unavailable, keeping HTTP result");
                None
            }
        }
    }
}

#[async_trait]
impl UrlAnalyzer for HybridAnalyzer {
    async fn analyze(&self, url: &str) -> ScanOutcome {
        let page = match fetch_page(&self.client, url, self.settings.max_response_size).await {
            Ok(page) => page,
            Err(FetchError::Timeout) => return ScanOutcome::Timeout { url: url.to_string() },
            Err(FetchError::Connection(_)) => {
                return ScanOutcome::ConnectionError { url: url.to_string() };
            }
            Err(FetchError::Oversize { bytes }) => {
                return ScanOutcome::Oversize { url: url.to_string(), bytes };
            }
            Err(FetchError::Other(message)) => {
                return ScanOutcome::Error { url: url.to_string(), message };
            }
        };

        let verdict = analyze_content(
            &page.body,
            Some(&page.headers),
            &self.settings.keywords,
            &self.settings.weights,
        );
        let mut scores = match verdict {
            ContentVerdict::Excluded(keyword) => {
                return ScanOutcome::Excluded { url: url.to_string(), keyword };
            }
            ContentVerdict::Protected(kind) => {
                return ScanOutcome::Protected { url: url.to_string(), kind };
            }
            ContentVerdict::Scored(scores) => scores,
        };

        let mut confidence = calculate_confidence(scores.phone, scores.verify);
        let mut method = FetchMethod::Http;

        if self.should_escalate(confidence) {
            debug!(
                url,
                confidence,
                js_required = detect_js_requirement(&page.body),
                "confidence below fallback threshold, trying browser render"
            );
            // The rendered result replaces the HTTP one outright, it is
            // never merged with it.
            if let Some(rendered) = self.escalate(url).await {
                scores = rendered;
                confidence = calculate_confidence(scores.phone, scores.verify);
                method = FetchMethod::Browser;
                info!(url, confidence, "rescored from browser render");
            }
        }

        let mut paths = Vec::new();
        let fuzz_wanted = !self.settings.scan_paths.is_empty()
            && (confidence > self.settings.weights.path_fuzz_trigger || page.status == 200);
        if fuzz_wanted {
            paths = check_paths(&self.client, url, &self.settings).await;
            if !paths.is_empty() {
                // Floor-raise only; a stronger primary score is kept.
                confidence = confidence.max(self.settings.weights.path_floor);
                scores.phone = scores.phone.max(self.settings.weights.path_floor);
            }
        }

        ScanOutcome::Analyzed(PageAnalysis {
            url: url.to_string(),
            http_status: page.status,
            confidence,
            phone_score: scores.phone,
            verify_score: scores.verify,
            method,
            signatures: scores.signatures,
            paths,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::browser::{RenderError, RenderedPage};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeRenderer {
        html: Option<String>,
        calls: AtomicUsize,
    }

    impl FakeRenderer {
        fn with_page(html: &str) -> Self {
            Self { html: Some(html.to_string()), calls: AtomicUsize::new(0) }
        }

        fn failing() -> Self {
            Self { html: None, calls: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl Renderer for FakeRenderer {
        async fn render(&self, _url: &str) -> Result<RenderedPage, RenderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.html {
                Some(html) => Ok(RenderedPage { html: html.clone(), status: 200 }),
                None => Err(RenderError::Status(502)),
            }
        }
    }

    fn analyzer_with(renderer: Option<Arc<dyn Renderer>>) -> HybridAnalyzer {
        let settings = Arc::new(Settings::default());
        let client = crate::core::fetcher::build_client(&settings, None).unwrap();
        HybridAnalyzer::new(client, settings, renderer)
    }

    #[test]
    fn escalation_triggers_strictly_below_threshold() {
        let renderer: Arc<dyn Renderer> = Arc::new(FakeRenderer::failing());
        let analyzer = analyzer_with(Some(renderer));
        // Default fallback threshold is 20.
        assert!(analyzer.should_escalate(15));
        assert!(analyzer.should_escalate(19));
        assert!(!analyzer.should_escalate(20));
        assert!(!analyzer.should_escalate(25));
    }

    #[test]
    fn no_renderer_means_no_escalation() {
        let analyzer = analyzer_with(None);
        assert!(!analyzer.should_escalate(0));
    }

    #[tokio::test]
    async fn render_failure_is_absorbed() {
        let renderer: Arc<dyn Renderer> = Arc::new(FakeRenderer::failing());
        let analyzer = analyzer_with(Some(renderer));
        assert!(analyzer.escalate("https://example.com").await.is_none());
    }

    #[tokio::test]
    async fn successful_render_is_rescored() {
        let renderer: Arc<dyn Renderer> = Arc::new(FakeRenderer::with_page(
            r#"<input type="tel" name="phone"><button>Send OTP</button>"#,
        ));
        let analyzer = analyzer_with(Some(renderer));
        let scores = analyzer.escalate("https://example.com").await.unwrap();
        assert!(scores.phone >= 30);
    }
}
