// src/config.rs

use color_eyre::eyre::{Result, WrapErr};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Runtime settings, loaded from a JSON file.
///
/// Every field has a default so a partial (or missing) file still yields a
/// working configuration. The scoring weights double as the historical
/// tuning of the heuristics; they are configuration rather than constants
/// so deployments can adjust them without a rebuild.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Number of concurrent scan workers.
    pub workers: usize,
    /// Capacity of the bounded candidate queue (producer backpressure).
    pub queue_capacity: usize,
    /// Per-fetch timeout for the primary HTTP request, in seconds.
    pub timeout_secs: u64,
    /// Timeout for one browser render call, in seconds. Renders are slow;
    /// this is deliberately much longer than `timeout_secs`.
    pub render_timeout_secs: u64,
    /// Response bodies larger than this are discarded unparsed.
    pub max_response_size: usize,
    /// Combined confidence at or above which a result counts as found
    /// and is handed to the notifier.
    pub confidence_threshold: u8,
    /// HTTP-only confidence below which the browser escalation is tried.
    pub fallback_threshold: u8,
    pub user_agent: String,
    /// Path of the SQLite dedup ledger.
    pub ledger_file: PathBuf,
    /// Relative sub-paths probed by the path fuzzer. Empty disables fuzzing.
    pub scan_paths: Vec<String>,
    /// Endpoint of the browser render service. None disables escalation.
    pub browser_service_url: Option<String>,
    pub proxy: ProxySettings,
    pub keywords: KeywordLists,
    pub weights: ScoreWeights,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workers: 5,
            queue_capacity: 200,
            timeout_secs: 10,
            render_timeout_secs: 35,
            max_response_size: 3 * 1024 * 1024,
            confidence_threshold: 60,
            fallback_threshold: 20,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string(),
            ledger_file: PathBuf::from("checked_urls.db"),
            scan_paths: Vec::new(),
            browser_service_url: None,
            proxy: ProxySettings::default(),
            keywords: KeywordLists::default(),
            weights: ScoreWeights::default(),
        }
    }
}

impl Settings {
    /// Loads settings from a JSON file, falling back to defaults if the
    /// file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read settings from {}", path.display()))?;
        serde_json::from_str(&raw)
            .wrap_err_with(|| format!("invalid settings file {}", path.display()))
    }
}

/// Optional rotating-proxy configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    pub enabled: bool,
    /// Text file with one proxy URL per line; `#` starts a comment.
    pub list_file: PathBuf,
    /// Rotate through the list instead of sticking to the first entry.
    pub rotate: bool,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            list_file: PathBuf::from("config/proxies.txt"),
            rotate: true,
        }
    }
}

/// Keyword lists driving the heuristic analyzer.
///
/// `phone` and `verify` are matched against form-control attributes and
/// visible text; `api` against URLs extracted from scripts; `exclude` is a
/// hard veto checked against the raw HTML before anything else.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KeywordLists {
    pub phone: Vec<String>,
    pub verify: Vec<String>,
    pub api: Vec<String>,
    pub exclude: Vec<String>,
}

impl Default for KeywordLists {
    fn default() -> Self {
        Self {
            phone: to_strings(&["phone", "mobile", "tel", "signup", "register"]),
            verify: to_strings(&["verify", "otp", "code", "send", "sms", "confirmation"]),
            api: to_strings(&["otp", "sms", "verify", "phone", "auth", "signup", "register"]),
            exclude: Vec::new(),
        }
    }
}

impl KeywordLists {
    /// Lowercases every list once at startup so the hot matching paths can
    /// compare without allocating.
    pub fn normalized(mut self) -> Self {
        for list in [&mut self.phone, &mut self.verify, &mut self.api, &mut self.exclude] {
            for kw in list.iter_mut() {
                *kw = kw.to_lowercase();
            }
        }
        self
    }
}

/// Empirically tuned score weights and clamps.
///
/// The values were carried over from field tuning and are deliberately kept
/// as defaults instead of re-derived.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    /// `type="tel"` or `inputmode="tel"` on a form control.
    pub input_tel: u16,
    /// `autocomplete` attribute containing "tel".
    pub input_autocomplete_tel: u16,
    /// Keyword hit in a form control's attributes.
    pub input_keyword: u16,
    /// Phone-plausible regex on a `pattern` attribute.
    pub input_pattern: u16,
    /// Phone keyword in visible text.
    pub text_phone: u16,
    /// Verify keyword in visible text.
    pub text_verify: u16,
    /// Per-category clamp for text scoring.
    pub text_clamp: u16,
    /// API keyword hit in an extracted script URL.
    pub api_endpoint: u16,
    /// OTP-style function name in script text.
    pub api_function: u16,
    /// Max counted matches per function-name pattern family.
    pub api_function_cap: usize,
    /// Each distinct provider fingerprint.
    pub signature: u16,
    /// Clamp for the provider-signature contribution.
    pub signature_clamp: u16,
    /// Local score a sub-path must exceed to be reported.
    pub sub_path_bar: u16,
    /// Floor applied to confidence and phone score on a strong sub-path.
    pub path_floor: u8,
    /// Confidence above which path fuzzing runs even on non-200 responses.
    pub path_fuzz_trigger: u8,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            input_tel: 30,
            input_autocomplete_tel: 20,
            input_keyword: 15,
            input_pattern: 10,
            text_phone: 5,
            text_verify: 10,
            text_clamp: 50,
            api_endpoint: 20,
            api_function: 15,
            api_function_cap: 5,
            signature: 25,
            signature_clamp: 50,
            sub_path_bar: 20,
            path_floor: 80,
            path_fuzz_trigger: 10,
        }
    }
}

/// Reads a text file into trimmed, non-empty lines, skipping `#` comments.
/// Used for URL feeds and proxy lists.
pub fn load_lines(path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read {}", path.display()))?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_historical_tuning() {
        let settings = Settings::default();
        assert_eq!(settings.workers, 5);
        assert_eq!(settings.confidence_threshold, 60);
        assert_eq!(settings.fallback_threshold, 20);
        assert_eq!(settings.max_response_size, 3 * 1024 * 1024);
        assert_eq!(settings.weights.input_tel, 30);
        assert_eq!(settings.weights.signature, 25);
    }

    #[test]
    fn partial_settings_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"workers": 12, "fallback_threshold": 25}}"#).unwrap();
        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.workers, 12);
        assert_eq!(settings.fallback_threshold, 25);
        assert_eq!(settings.timeout_secs, 10);
    }

    #[test]
    fn load_lines_skips_comments_and_blanks() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# comment").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "  https://example.com  ").unwrap();
        let lines = load_lines(file.path()).unwrap();
        assert_eq!(lines, vec!["https://example.com"]);
    }
}
