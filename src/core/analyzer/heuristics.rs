// src/core/analyzer/heuristics.rs

//! Stateless page scoring.
//!
//! All functions here are pure, synchronous CPU work over an already
//! fetched page: the exclusion veto, protection detection, the scored
//! signal categories (form controls, visible text, scripts, provider
//! fingerprints) and the confidence combination. The gates short-circuit
//! in a fixed order: exclusion first, protection second, scoring last.

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::HeaderMap;
use scraper::{Html, Selector};

use super::signatures::detect_providers;
use crate::config::{KeywordLists, ScoreWeights};
use crate::core::models::ProtectionKind;

static FORM_CONTROLS: Lazy<Selector> =
    Lazy::new(|| Selector::parse("input, textarea, select").unwrap());
static TEXT_ELEMENTS: Lazy<Selector> =
    Lazy::new(|| Selector::parse("label, button, a, h1, h2, h3, span").unwrap());
static SCRIPTS: Lazy<Selector> = Lazy::new(|| Selector::parse("script").unwrap());
static TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("title").unwrap());

/// A `pattern` attribute that plausibly validates a phone number.
static RE_PHONE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\d\+\-\(\)]{6,}").unwrap());

/// Endpoint-looking URLs inside markup or script text.
static RE_API_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:https?://[^\s"'\)<>]+|/api/[^\s"'\)<>]+|/v\d+/[^\s"'\)<>]+)"#).unwrap()
});

/// OTP-style function-name families in script text.
static RE_SEND_OTP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)send(?:Otp|Sms|Code|Verification)").unwrap());
static RE_VERIFY_OTP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)verify(?:Otp|Code|Phone|Sms)").unwrap());
static RE_CHECK_OTP: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)check(?:Otp|Phone)").unwrap());
static API_FUNCTION_FAMILIES: &[&Lazy<Regex>] = &[&RE_SEND_OTP, &RE_VERIFY_OTP, &RE_CHECK_OTP];

/// Markers of a Cloudflare challenge page.
const CLOUDFLARE_MARKERS: &[&str] =
    &["cf-ray", "__cf_chl", "challenge-platform", "cloudflare", "just a moment"];

/// Markers of a CAPTCHA wall.
const CAPTCHA_MARKERS: &[&str] = &["recaptcha", "g-recaptcha", "hcaptcha", "captcha"];

/// SPA framework markers that imply the static HTML is an empty shell.
const JS_FRAMEWORK_MARKERS: &[&str] = &[
    "react",
    "vue.js",
    "angular",
    "__next",
    "nuxt",
    "gatsby",
    "webpack",
    "app-root",
    "data-reactroot",
    "id=\"__nuxt\"",
    "data-vuejs",
];

static RE_BODY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<body[^>]*>(.*?)</body>").unwrap());
static RE_SCRIPT_BLOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<script.*?</script>").unwrap());

/// The scored portion of a page analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageScores {
    pub phone: u8,
    pub verify: u8,
    pub signatures: Vec<String>,
}

/// Result of running every analyzer gate over one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentVerdict {
    /// An exclusion keyword matched; the page is vetoed unscored.
    Excluded(String),
    /// A bot wall was detected; the page is never scored.
    Protected(ProtectionKind),
    /// The page passed both gates and was scored.
    Scored(PageScores),
}

/// Runs the full gate-then-score sequence over fetched HTML.
///
/// `headers` is the response header map of the primary fetch; rendered
/// HTML from the escalation service has no headers and passes `None`.
pub fn analyze_content(
    html: &str,
    headers: Option<&HeaderMap>,
    keywords: &KeywordLists,
    weights: &ScoreWeights,
) -> ContentVerdict {
    let html_lower = html.to_lowercase();

    if let Some(keyword) = check_exclusion(&html_lower, keywords) {
        return ContentVerdict::Excluded(keyword);
    }
    if let Some(kind) = detect_protection(headers, &html_lower) {
        return ContentVerdict::Protected(kind);
    }
    ContentVerdict::Scored(score_page(html, keywords, weights))
}

/// First exclusion keyword found in the lowercased raw HTML, if any.
/// Cheapest check and the highest-precedence veto.
pub fn check_exclusion(html_lower: &str, keywords: &KeywordLists) -> Option<String> {
    keywords
        .exclude
        .iter()
        .find(|keyword| html_lower.contains(keyword.as_str()))
        .cloned()
}

/// Detects bot walls before any scoring happens. Cloudflare takes
/// precedence over CAPTCHA markers.
pub fn detect_protection(headers: Option<&HeaderMap>, html_lower: &str) -> Option<ProtectionKind> {
    if let Some(headers) = headers {
        let header_hit = headers
            .keys()
            .any(|name| name.as_str().contains("cf-ray") || name.as_str().contains("cloudflare"));
        if header_hit {
            return Some(ProtectionKind::Cloudflare);
        }
    }
    if CLOUDFLARE_MARKERS.iter().any(|marker| html_lower.contains(marker)) {
        return Some(ProtectionKind::Cloudflare);
    }
    if CAPTCHA_MARKERS.iter().any(|marker| html_lower.contains(marker)) {
        return Some(ProtectionKind::Captcha);
    }
    None
}

/// Scores a page without the exclusion/protection gates. Used directly for
/// the escalation re-run, where the gates already passed on the HTTP body.
pub fn score_page(html: &str, keywords: &KeywordLists, weights: &ScoreWeights) -> PageScores {
    let doc = Html::parse_document(html);

    let inputs = score_inputs(&doc, keywords, weights);
    let text = score_text(&doc, keywords, weights);
    let (script_verify, script_text) = score_scripts(&doc, html, keywords, weights);

    let signatures = detect_providers(&format!("{html} {script_text}"));
    let signature_score =
        (signatures.len() as u16 * weights.signature).min(weights.signature_clamp);

    PageScores {
        phone: clamp_score(inputs.phone + text.phone),
        verify: clamp_score(inputs.verify + text.verify + script_verify + signature_score),
        signatures,
    }
}

/// Combines the two category scores into a single confidence value.
///
/// Corroborating dual signals are rewarded superlinearly; a weak single
/// signal degrades gracefully instead of vanishing. Total over the full
/// score domain and monotone in each argument.
pub fn calculate_confidence(phone: u8, verify: u8) -> u8 {
    let (p, v) = (phone as u16, verify as u16);
    let combined = if p >= 40 && v >= 40 {
        p + v
    } else if p >= 50 {
        p + v / 2
    } else if v >= 50 {
        v + p / 2
    } else {
        (p + v) / 2
    };
    combined.min(100) as u8
}

/// Heuristic for pages that only materialize under JavaScript. Purely
/// diagnostic: logged when deciding whether an escalation was warranted.
pub fn detect_js_requirement(html: &str) -> bool {
    if html.len() < 100 {
        return false;
    }
    let html_lower = html.to_lowercase();

    if JS_FRAMEWORK_MARKERS.iter().any(|marker| html_lower.contains(marker)) {
        return true;
    }

    let script_count = html_lower.matches("<script").count();
    if script_count > 10 {
        return true;
    }

    // A nearly empty body next to several scripts is the SPA shell shape.
    if let Some(captures) = RE_BODY.captures(&html_lower) {
        let body = RE_SCRIPT_BLOCK.replace_all(&captures[1], "");
        if body.trim().len() < 200 && script_count > 3 {
            return true;
        }
    }
    false
}

/// Page title, used to label path-fuzz hits.
pub fn page_title(doc: &Html) -> String {
    doc.select(&TITLE)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|title| !title.is_empty())
        .unwrap_or_else(|| "No Title".to_string())
}

/// Per-category running sums before the final clamp.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct CategoryScores {
    pub phone: u16,
    pub verify: u16,
}

/// Scores form controls: the strongest phone signals live in input
/// attributes rather than page text.
pub(crate) fn score_inputs(
    doc: &Html,
    keywords: &KeywordLists,
    weights: &ScoreWeights,
) -> CategoryScores {
    let mut scores = CategoryScores::default();

    for control in doc.select(&FORM_CONTROLS) {
        let element = control.value();
        let attr = |name: &str| element.attr(name).unwrap_or_default().to_lowercase();
        let attrs_text = [
            attr("id"),
            attr("name"),
            attr("class"),
            attr("placeholder"),
            attr("type"),
            attr("inputmode"),
            attr("autocomplete"),
            attr("aria-label"),
        ]
        .join(" ");

        if attr("type") == "tel" || attr("inputmode") == "tel" {
            scores.phone = scores.phone.saturating_add(weights.input_tel);
        }
        if attr("autocomplete").contains("tel") {
            scores.phone = scores.phone.saturating_add(weights.input_autocomplete_tel);
        }

        for keyword in &keywords.phone {
            if attrs_text.contains(keyword.as_str()) {
                scores.phone = scores.phone.saturating_add(weights.input_keyword);
            }
        }
        for keyword in &keywords.verify {
            if attrs_text.contains(keyword.as_str()) {
                scores.verify = scores.verify.saturating_add(weights.input_keyword);
            }
        }

        let pattern = attr("pattern");
        if !pattern.is_empty() && RE_PHONE_PATTERN.is_match(&pattern) {
            scores.phone = scores.phone.saturating_add(weights.input_pattern);
        }
    }

    CategoryScores {
        phone: scores.phone.min(100),
        verify: scores.verify.min(100),
    }
}

/// Scores labels, buttons, links and headings with low weights, clamped
/// tightly so text noise cannot dominate the structural signals.
pub(crate) fn score_text(
    doc: &Html,
    keywords: &KeywordLists,
    weights: &ScoreWeights,
) -> CategoryScores {
    let mut scores = CategoryScores::default();

    for element in doc.select(&TEXT_ELEMENTS) {
        let text = element
            .text()
            .map(str::trim)
            .filter(|chunk| !chunk.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        if text.is_empty() || text.len() > 200 {
            continue;
        }

        for keyword in &keywords.phone {
            if text.contains(keyword.as_str()) {
                scores.phone = scores.phone.saturating_add(weights.text_phone);
            }
        }
        for keyword in &keywords.verify {
            if text.contains(keyword.as_str()) {
                scores.verify = scores.verify.saturating_add(weights.text_verify);
            }
        }
    }

    CategoryScores {
        phone: scores.phone.min(weights.text_clamp),
        verify: scores.verify.min(weights.text_clamp),
    }
}

/// Extracts endpoint URLs and OTP-style function names from inline
/// scripts. Returns the verify contribution plus the concatenated script
/// text for fingerprinting.
fn score_scripts(
    doc: &Html,
    html: &str,
    keywords: &KeywordLists,
    weights: &ScoreWeights,
) -> (u16, String) {
    let script_text = doc
        .select(&SCRIPTS)
        .map(|script| script.text().collect::<String>())
        .collect::<Vec<_>>()
        .join(" ");

    let mut verify: u16 = 0;
    let haystack = format!("{html} {script_text}");

    for url in RE_API_URL.find_iter(&haystack) {
        let url_lower = url.as_str().to_lowercase();
        if keywords.api.iter().any(|keyword| url_lower.contains(keyword.as_str())) {
            verify = verify.saturating_add(weights.api_endpoint);
        }
    }

    for family in API_FUNCTION_FAMILIES {
        let matches = family.find_iter(&script_text).take(weights.api_function_cap).count();
        verify = verify.saturating_add((matches as u16).saturating_mul(weights.api_function));
    }

    (verify.min(100), script_text)
}

fn clamp_score(score: u16) -> u8 {
    score.min(100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{KeywordLists, ScoreWeights};

    fn keywords() -> KeywordLists {
        KeywordLists::default().normalized()
    }

    fn weights() -> ScoreWeights {
        ScoreWeights::default()
    }

    #[test]
    fn confidence_stays_in_range_over_full_domain() {
        for phone in (0..=100).step_by(5) {
            for verify in (0..=100).step_by(5) {
                let confidence = calculate_confidence(phone, verify);
                assert!(confidence <= 100, "({phone},{verify}) -> {confidence}");
            }
        }
    }

    #[test]
    fn confidence_is_monotone_in_each_argument() {
        for phone in 0..100u8 {
            for verify in (0..=100).step_by(10) {
                assert!(
                    calculate_confidence(phone + 1, verify) >= calculate_confidence(phone, verify),
                    "phone step at ({phone},{verify})"
                );
                assert!(
                    calculate_confidence(verify, phone + 1) >= calculate_confidence(verify, phone),
                    "verify step at ({verify},{phone})"
                );
            }
        }
    }

    #[test]
    fn confidence_rewards_dual_signals() {
        // Both categories clear 40: the scores add.
        assert_eq!(calculate_confidence(45, 45), 90);
        // Strong single signal with weak support.
        assert_eq!(calculate_confidence(60, 20), 70);
        assert_eq!(calculate_confidence(20, 60), 70);
        // Two weak signals average out.
        assert_eq!(calculate_confidence(30, 30), 30);
        assert_eq!(calculate_confidence(100, 100), 100);
    }

    #[test]
    fn exclusion_beats_strong_signals() {
        let mut kw = keywords();
        kw.exclude = vec!["casino".to_string()];
        let html = r#"
            <html><body>
                <h1>Best CASINO phone verification</h1>
                <input type="tel" name="phone">
                <button>Send OTP</button>
            </body></html>
        "#;
        let verdict = analyze_content(html, None, &kw, &weights());
        assert_eq!(verdict, ContentVerdict::Excluded("casino".to_string()));
    }

    #[test]
    fn cloudflare_wall_never_reaches_scoring() {
        let html = r#"
            <html><body>
                <div class="challenge-platform">Just a moment...</div>
                <input type="tel" name="phone">
            </body></html>
        "#;
        let verdict = analyze_content(html, None, &keywords(), &weights());
        assert_eq!(verdict, ContentVerdict::Protected(ProtectionKind::Cloudflare));
    }

    #[test]
    fn cloudflare_detected_from_response_header() {
        let mut headers = HeaderMap::new();
        headers.insert("cf-ray", "8d3a1f-EWR".parse().unwrap());
        let verdict = analyze_content("<html><body>ok</body></html>", Some(&headers), &keywords(), &weights());
        assert_eq!(verdict, ContentVerdict::Protected(ProtectionKind::Cloudflare));
    }

    #[test]
    fn captcha_markers_trigger_protection() {
        let html = r#"<div class="g-recaptcha" data-sitekey="x"></div>"#;
        let verdict = analyze_content(html, None, &keywords(), &weights());
        assert_eq!(verdict, ContentVerdict::Protected(ProtectionKind::Captcha));
    }

    #[test]
    fn tel_input_with_otp_button_and_twilio_script() {
        let html = r#"
            <html><body>
                <form>
                    <input type="tel" name="phone_number" placeholder="Phone number">
                    <button>Send OTP</button>
                </form>
                <script>var device = Twilio.Device.setup(token);</script>
            </body></html>
        "#;
        let verdict = analyze_content(html, None, &keywords(), &weights());
        let ContentVerdict::Scored(scores) = verdict else {
            panic!("expected a scored page, got {verdict:?}");
        };

        assert!(scores.phone >= 30, "phone score {}", scores.phone);
        assert!(scores.verify >= 25, "verify score {}", scores.verify);
        assert!(scores.signatures.contains(&"twilio".to_string()));

        let confidence = calculate_confidence(scores.phone, scores.verify);
        assert!(confidence >= 55, "confidence {confidence}");
    }

    #[test]
    fn blank_page_scores_zero_everywhere() {
        let verdict = analyze_content("", None, &keywords(), &weights());
        let ContentVerdict::Scored(scores) = verdict else {
            panic!("blank page must still be scored");
        };
        assert_eq!(scores.phone, 0);
        assert_eq!(scores.verify, 0);
        assert!(scores.signatures.is_empty());
        assert_eq!(calculate_confidence(scores.phone, scores.verify), 0);
    }

    #[test]
    fn autocomplete_and_pattern_add_phone_signal() {
        let html = r#"
            <input name="contact" autocomplete="tel-national" pattern="\+0123456789">
        "#;
        let doc = Html::parse_document(html);
        let scores = score_inputs(&doc, &keywords(), &weights());
        // autocomplete tel (+20) and phone-looking pattern (+10).
        assert!(scores.phone >= 30, "phone {}", scores.phone);
    }

    #[test]
    fn keyword_dense_page_saturates_instead_of_overflowing() {
        // Hundreds of keyword-stuffed controls fit comfortably under the
        // response size cap; the running sums must clamp, not wrap.
        let controls = r#"<input type="tel" name="phone mobile tel signup register">"#.repeat(700);
        let labels = "<label>verify otp code send sms confirmation</label>".repeat(700);
        let html = format!("<html><body>{controls}{labels}</body></html>");

        let verdict = analyze_content(&html, None, &keywords(), &weights());
        let ContentVerdict::Scored(scores) = verdict else {
            panic!("keyword-dense page must still be scored");
        };
        assert_eq!(scores.phone, 100);
        assert_eq!(scores.verify, 50);
    }

    #[test]
    fn text_scoring_is_clamped_against_noise() {
        let spans: String = "<span>verify code otp</span>".repeat(40);
        let doc = Html::parse_document(&format!("<body>{spans}</body>"));
        let scores = score_text(&doc, &keywords(), &weights());
        assert_eq!(scores.verify, 50);
    }

    #[test]
    fn api_urls_in_scripts_raise_verify_score() {
        let html = r#"
            <script>
                fetch('/api/v2/sms/send', {method: 'POST'});
                function sendOtp(n) { return verifyCode(n); }
            </script>
        "#;
        let verdict = analyze_content(html, None, &keywords(), &weights());
        let ContentVerdict::Scored(scores) = verdict else { panic!() };
        assert!(scores.verify >= 35, "verify {}", scores.verify);
    }

    #[test]
    fn spa_shell_requires_javascript() {
        let html = format!(
            "<html><head><script src=\"a.js\"></script><script src=\"b.js\"></script>\
             <script src=\"c.js\"></script><script src=\"d.js\"></script></head>\
             <body><div id=\"root\"></div></body></html>{}",
            " ".repeat(100)
        );
        assert!(detect_js_requirement(&html));
        assert!(!detect_js_requirement("<html><body><p>plain static page with plenty of real content in the body so it does not look like a shell at all</p></body></html>"));
    }
}
