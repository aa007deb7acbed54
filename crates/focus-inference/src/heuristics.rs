//! Zero-cost pre-classification.
//!
//! Bulk and machine-sent mail is recognizable from headers alone. When a
//! rule fires the model is never called.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value as JsonValue;

use focus_core::defaults::NEWSLETTER_MIN_BODY_CHARS;
use focus_core::{Classification, Label, RawInteraction, Urgency};

/// Classifier name recorded for heuristic decisions.
pub const HEURISTIC_CLASSIFIER: &str = "heuristic";

/// Bulk-mail platforms, matched against the sender domain and its parents.
const BULK_DOMAINS: &[&str] = &[
    "mailchimp.com",
    "sendgrid.net",
    "constantcontact.com",
    "mailgun.org",
    "amazonses.com",
    "postmarkapp.com",
    "hubspot.com",
    "klaviyo.com",
    "brevo.com",
    "mailjet.com",
    "campaign-archive.com",
];

/// How many trailing characters of the body are searched for an unsubscribe footer.
const FOOTER_WINDOW_CHARS: usize = 500;

fn noreply_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)(^|<|\s)(no[-_]?reply|mailer[-_]?daemon|notifications?@|updates?@|info@|support@|news@|marketing@|digest@)",
        )
        .expect("valid no-reply regex")
    })
}

fn sender_domain_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@([\w.-]+)>?\s*$").expect("valid domain regex"))
}

/// Case-insensitive header lookup over top-level metadata and a nested
/// `headers` object.
pub fn header<'a>(metadata: &'a JsonValue, name: &str) -> Option<&'a str> {
    let lookup = |obj: &'a JsonValue| {
        obj.as_object()?
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v.as_str())
    };
    lookup(metadata).or_else(|| metadata.get("headers").and_then(lookup))
}

fn bulk(label: Label, confidence: f64) -> Classification {
    Classification::new(label, confidence)
        .with_urgency(Urgency::Low)
        .with_classifier(HEURISTIC_CLASSIFIER)
}

/// Classify from headers and body shape alone, or `None` to defer to the model.
pub fn pre_classify(raw: &RawInteraction) -> Option<Classification> {
    let meta = &raw.raw_metadata;
    let sender = header(meta, "from").unwrap_or_default();

    if !sender.is_empty() && noreply_regex().is_match(sender) {
        return Some(bulk(Label::Automated, 0.95));
    }

    if header(meta, "list-unsubscribe").is_some_and(|v| !v.trim().is_empty()) {
        return Some(bulk(Label::Newsletter, 0.90));
    }

    let precedence = header(meta, "precedence")
        .unwrap_or_default()
        .trim()
        .to_lowercase();
    if matches!(precedence.as_str(), "bulk" | "list" | "junk") {
        return Some(bulk(Label::Newsletter, 0.90));
    }

    if let Some(domain) = sender_domain_regex()
        .captures(sender)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_lowercase())
    {
        let is_bulk = BULK_DOMAINS
            .iter()
            .any(|b| domain == *b || domain.ends_with(&format!(".{b}")));
        if is_bulk {
            return Some(bulk(Label::Newsletter, 0.85));
        }
    }

    if has_unsubscribe_footer(&raw.raw_content) {
        return Some(bulk(Label::Newsletter, 0.80));
    }

    None
}

fn has_unsubscribe_footer(body: &str) -> bool {
    let chars = body.chars().count();
    if chars <= NEWSLETTER_MIN_BODY_CHARS {
        return false;
    }
    let tail: String = body
        .chars()
        .skip(chars.saturating_sub(FOOTER_WINDOW_CHARS))
        .collect::<String>()
        .to_lowercase();
    tail.contains("unsubscribe")
        && ["preferences", "opt out", "opt-out", "manage"]
            .iter()
            .any(|kw| tail.contains(kw))
}
