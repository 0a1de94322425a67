// src/core/analyzer/signatures.rs

//! Fingerprints of known OTP/SMS providers.
//!
//! Each provider is described by a small set of patterns matched against
//! the combined page and script text; the first matching pattern tags the
//! page with that provider. The table is static because the providers and
//! their SDK markers change rarely.

use once_cell::sync::Lazy;
use regex::Regex;

/// A rule that ties a provider tag to its detection patterns.
struct ProviderFingerprint {
    provider: &'static str,
    patterns: &'static [&'static Lazy<Regex>],
}

static RE_FIREBASE_INIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)firebase\.initializeApp").unwrap());
static RE_FIREBASE_AUTH: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)firebase\.auth\(\)").unwrap());
static RE_FIREBASE_PHONE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)signInWithPhoneNumber").unwrap());
static RE_FIREBASE_RECAPTCHA: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)recaptcha-container").unwrap());
static RE_TWILIO_DEVICE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)Twilio\.Device").unwrap());
static RE_TWILIO_CHAT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)Twilio\.Chat").unwrap());
static RE_TWILIO_API: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)api\.twilio\.com").unwrap());
static RE_MSG91: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)msg91").unwrap());
static RE_INFOBIP: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)infobip").unwrap());
static RE_NEXMO: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)nexmo|vonage").unwrap());
static RE_AWS_SDK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)aws-sdk").unwrap());
static RE_AWS_SNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)AWS\.SNS|sns\.amazonaws").unwrap());
static RE_PLIVO: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)plivo").unwrap());
static RE_MESSAGEBIRD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)messagebird").unwrap());

/// The master provider table.
static PROVIDERS: &[ProviderFingerprint] = &[
    ProviderFingerprint {
        provider: "firebase",
        patterns: &[&RE_FIREBASE_INIT, &RE_FIREBASE_AUTH, &RE_FIREBASE_PHONE, &RE_FIREBASE_RECAPTCHA],
    },
    ProviderFingerprint {
        provider: "twilio",
        patterns: &[&RE_TWILIO_DEVICE, &RE_TWILIO_CHAT, &RE_TWILIO_API],
    },
    ProviderFingerprint { provider: "msg91", patterns: &[&RE_MSG91] },
    ProviderFingerprint { provider: "infobip", patterns: &[&RE_INFOBIP] },
    ProviderFingerprint { provider: "nexmo", patterns: &[&RE_NEXMO] },
    ProviderFingerprint { provider: "aws_sns", patterns: &[&RE_AWS_SDK, &RE_AWS_SNS] },
    ProviderFingerprint { provider: "plivo", patterns: &[&RE_PLIVO] },
    ProviderFingerprint { provider: "messagebird", patterns: &[&RE_MESSAGEBIRD] },
];

/// Returns the distinct provider tags matched in the given text.
/// Each provider is reported at most once regardless of pattern count.
pub fn detect_providers(text: &str) -> Vec<String> {
    let mut found = Vec::new();
    for fingerprint in PROVIDERS {
        if fingerprint.patterns.iter().any(|re| re.is_match(text)) {
            found.push(fingerprint.provider.to_string());
        }
    }
    found
}
