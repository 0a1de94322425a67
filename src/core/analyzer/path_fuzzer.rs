// src/core/analyzer/path_fuzzer.rs

//! Secondary probe over known sub-paths.
//!
//! When the primary page is weakly positive, a handful of well-known
//! sub-paths (signup, verify, register and friends) often carry the real
//! verification form. Each configured path gets one independent bounded
//! fetch and a reduced scoring pass over form controls and visible text
//! only; per-path failures are silently skipped. This is a signal booster,
//! never a primary source of an analyzed outcome.

use scraper::Html;
use tracing::debug;
use url::Url;

use super::heuristics::{page_title, score_inputs, score_text};
use crate::config::Settings;
use crate::core::models::PathHit;

/// Probes the configured sub-paths under `base_url` and reports the ones
/// whose local score exceeds the reporting bar.
pub async fn check_paths(
    client: &reqwest::Client,
    base_url: &str,
    settings: &Settings,
) -> Vec<PathHit> {
    let Ok(base) = Url::parse(base_url) else {
        return Vec::new();
    };

    let mut hits = Vec::new();
    for path in &settings.scan_paths {
        let Ok(probe_url) = base.join(path) else {
            debug!(base = base_url, path, "sub-path does not join, skipping");
            continue;
        };

        let Ok(response) = client.get(probe_url.clone()).send().await else {
            continue;
        };
        if response.status().as_u16() != 200 {
            continue;
        }
        let Ok(body) = response.text().await else {
            continue;
        };

        if let Some(hit) = score_sub_path(probe_url.as_str(), &body, settings) {
            debug!(url = %hit.url, score = hit.score, "sub-path above reporting bar");
            hits.push(hit);
        }
    }
    hits
}

/// Reduced scoring for one fetched sub-path: inputs and text only, no
/// script or fingerprint work.
fn score_sub_path(url: &str, body: &str, settings: &Settings) -> Option<PathHit> {
    let doc = Html::parse_document(body);
    let inputs = score_inputs(&doc, &settings.keywords, &settings.weights);
    let text = score_text(&doc, &settings.keywords, &settings.weights);

    let score = inputs.phone + text.phone + inputs.verify;
    if score <= settings.weights.sub_path_bar {
        return None;
    }

    Some(PathHit {
        url: url.to_string(),
        score,
        title: page_title(&doc),
    })
}
