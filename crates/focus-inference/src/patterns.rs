//! Lightweight extraction for automated mail: receipts, shipping and
//! billing notices. Pure pattern matching, no external calls.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

use focus_core::{LightCategory, LightExtraction, LightExtractor};

/// Model name recorded in the envelope for pattern extraction.
pub const PATTERN_EXTRACTOR_MODEL: &str = "patterns-v1";

struct Patterns {
    order: Vec<Regex>,
    tracking: Vec<Regex>,
    amount: Vec<Regex>,
    date: Vec<Regex>,
    carrier: Regex,
    status: Regex,
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("valid extraction pattern"))
        .collect()
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        order: compile(&[
            r"(?i)order\s*#?\s*(\d[\d-]{4,})",
            r"(?i)order\s+number[:\s]*(\w[\w-]{4,})",
            r"(?i)confirmation\s*#?\s*(\w[\w-]{4,})",
        ]),
        tracking: compile(&[
            // UPS
            r"\b(1Z[A-Z0-9]{16})\b",
            // USPS
            r"\b(9[0-9]{21,26})\b",
            // FedEx, only near tracking context
            r"(?i)(?:tracking|fedex|shipment)\s*(?:#|number|:)?\s*:?\s*(\d{12,15})\b",
            r"(?i)tracking\s*#?\s*:?\s*([A-Za-z0-9]{10,30})",
        ]),
        amount: compile(&[
            r"\$\s*([\d,]+(?:\.\d{1,2})?)",
            r"(?i)(?:total|amount|charged)[:\s]*\$\s*([\d,]+(?:\.\d{1,2})?)",
        ]),
        date: compile(&[
            r"(?i)(?:delivery|arrive|expected|estimated)\s+(?:by|on|date)[:\s]*([A-Za-z]+ \d{1,2},?\s*\d{4})",
            r"(?i)(?:ship|deliver)\w*\s+(?:on|by)\s+([A-Za-z]+ \d{1,2},?\s*\d{4})",
            r"\b(\d{1,2}/\d{1,2}/\d{2,4})\b",
        ]),
        carrier: Regex::new(r"(?i)\b(UPS|USPS|FedEx|DHL|Amazon Logistics)\b")
            .expect("valid carrier pattern"),
        status: Regex::new(
            r"(?i)\b(shipped|delivered|out for delivery|in transit|processing|confirmed|cancelled|refunded)\b",
        )
        .expect("valid status pattern"),
    })
}

/// Keyword table checked in order; the first category with a hit wins.
const CATEGORY_KEYWORDS: &[(LightCategory, &[&str])] = &[
    (
        LightCategory::Order,
        &["order", "purchase", "receipt", "confirmation", "invoice"],
    ),
    (
        LightCategory::Shipping,
        &["shipped", "tracking", "delivery", "package", "carrier"],
    ),
    (
        LightCategory::Billing,
        &["bill", "payment", "statement", "due", "charged"],
    ),
    (
        LightCategory::Alert,
        &["alert", "notification", "warning", "security", "login"],
    ),
    (
        LightCategory::Subscription,
        &["subscription", "renewal", "membership"],
    ),
];

fn detect_category(head: &str) -> LightCategory {
    let head = head.to_lowercase();
    CATEGORY_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|kw| head.contains(kw)))
        .map(|(category, _)| *category)
        .unwrap_or_default()
}

fn captures(regexes: &[Regex], text: &str) -> BTreeSet<String> {
    regexes
        .iter()
        .flat_map(|re| re.captures_iter(text))
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

fn canonical_carrier(word: &str) -> String {
    match word {
        w if w.eq_ignore_ascii_case("ups") => "UPS".into(),
        w if w.eq_ignore_ascii_case("usps") => "USPS".into(),
        w if w.eq_ignore_ascii_case("dhl") => "DHL".into(),
        w if w.eq_ignore_ascii_case("fedex") => "FedEx".into(),
        _ => "Amazon Logistics".into(),
    }
}

/// Regex-driven [`LightExtractor`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternExtractor;

impl PatternExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl LightExtractor for PatternExtractor {
    fn extract(&self, content: &str) -> LightExtraction {
        let p = patterns();
        // Subject and sender usually sit on the first lines.
        let head: String = content.lines().take(3).collect::<Vec<_>>().join(" ");

        let amounts = captures(&p.amount, content)
            .into_iter()
            .filter_map(|a| a.replace(',', "").parse::<f64>().ok())
            .collect();

        let carriers: BTreeSet<String> = p
            .carrier
            .captures_iter(content)
            .filter_map(|c| c.get(1).map(|m| canonical_carrier(m.as_str())))
            .collect();

        let statuses: BTreeSet<String> = p
            .status
            .captures_iter(content)
            .filter_map(|c| c.get(1).map(|m| m.as_str().to_lowercase()))
            .collect();

        LightExtraction {
            category: detect_category(&head),
            order_numbers: captures(&p.order, content).into_iter().collect(),
            tracking_numbers: captures(&p.tracking, content).into_iter().collect(),
            amounts,
            dates: captures(&p.date, content).into_iter().collect(),
            carriers: carriers.into_iter().collect(),
            statuses: statuses.into_iter().collect(),
        }
    }

    fn model_name(&self) -> &str {
        PATTERN_EXTRACTOR_MODEL
    }
}
