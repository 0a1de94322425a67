// src/main.rs

use color_eyre::eyre::{Result, eyre};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use veriscan_rs_scanner::config::{Settings, load_lines};
use veriscan_rs_scanner::core::analyzer::{HybridAnalyzer, UrlAnalyzer};
use veriscan_rs_scanner::core::browser::{BrowserService, Renderer};
use veriscan_rs_scanner::core::fetcher::{ProxyRotator, build_client};
use veriscan_rs_scanner::core::ledger::UrlLedger;
use veriscan_rs_scanner::core::models::PageAnalysis;
use veriscan_rs_scanner::core::pipeline::Pipeline;
use veriscan_rs_scanner::logging;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    logging::initialize_logging()?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (config_path, urls_path) = match args.as_slice() {
        [urls] => (PathBuf::from("config/settings.json"), PathBuf::from(urls)),
        [config, urls] => (PathBuf::from(config), PathBuf::from(urls)),
        _ => return Err(eyre!("usage: veriscan-rs-scanner [CONFIG_FILE] URLS_FILE")),
    };

    let settings = {
        let mut loaded = Settings::load(&config_path)?;
        loaded.keywords = loaded.keywords.normalized();
        Arc::new(loaded)
    };

    let candidates = load_candidates(&urls_path)?;
    info!(count = candidates.len(), file = %urls_path.display(), "loaded candidate URLs");

    let ledger = Arc::new(UrlLedger::open(&settings.ledger_file)?);
    let swept = ledger.reset_pending()?;
    if swept > 0 {
        warn!(swept, "cleared pending claims left by a previous run");
    }

    let rotator = ProxyRotator::from_settings(&settings);
    let proxy = rotator.as_ref().map(|r| r.next().to_string());
    if let Some(proxy_url) = &proxy {
        info!(proxy = %proxy_url, "routing scan traffic through proxy");
    }
    let client = build_client(&settings, proxy.as_deref())?;

    let renderer: Option<Arc<dyn Renderer>> = match &settings.browser_service_url {
        Some(endpoint) => {
            info!(endpoint = %endpoint, "browser escalation enabled");
            let service = BrowserService::new(
                endpoint.clone(),
                Duration::from_secs(settings.render_timeout_secs),
            )?;
            Some(Arc::new(service))
        }
        None => None,
    };

    let analyzer: Arc<dyn UrlAnalyzer> =
        Arc::new(HybridAnalyzer::new(client, Arc::clone(&settings), renderer));
    let pipeline = Pipeline::new(analyzer, Arc::clone(&ledger), Arc::clone(&settings));

    let (candidate_tx, candidate_rx) = mpsc::channel(settings.queue_capacity);
    let (found_tx, mut found_rx) = mpsc::channel::<PageAnalysis>(settings.queue_capacity);

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, draining workers");
            ctrl_c_cancel.cancel();
        }
    });

    // Feeds the bounded queue; backpressure stalls this task, not a worker.
    let producer = tokio::spawn(async move {
        for url in candidates {
            if candidate_tx.send(url).await.is_err() {
                break;
            }
        }
    });

    let notifier = tokio::spawn(async move {
        let mut count = 0u64;
        while let Some(analysis) = found_rx.recv().await {
            count += 1;
            info!(
                confidence = analysis.confidence,
                method = %analysis.method,
                signatures = ?analysis.signatures,
                paths = analysis.paths.len(),
                "FOUND {}",
                analysis.url
            );
        }
        count
    });

    let report = pipeline.run(candidate_rx, found_tx, cancel).await;
    if let Err(err) = producer.await {
        error!(error = %err, "candidate producer aborted");
    }
    let notified = notifier.await.unwrap_or(0);

    let stats = ledger.stats(settings.confidence_threshold)?;
    info!(
        checked = report.checked,
        found = report.found,
        duplicates = report.duplicates,
        failures = report.failures,
        notified,
        ledger_total = stats.total,
        ledger_found = stats.found,
        found_rate = format!("{:.1}%", stats.found_rate()),
        "scan complete"
    );

    Ok(())
}

/// Loads the URL feed, defaulting bare hosts to an https scheme.
fn load_candidates(path: &Path) -> Result<Vec<String>> {
    let lines = load_lines(path)?;
    Ok(lines
        .into_iter()
        .map(|raw| {
            if raw.starts_with("http://") || raw.starts_with("https://") {
                raw
            } else {
                format!("https://{raw}")
            }
        })
        .collect())
}
