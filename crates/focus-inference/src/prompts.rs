//! Prompt templates for the classification and deep extraction capabilities.
//!
//! Prompt text is versioned alongside [`focus_core::defaults::EXTRACTION_VERSION`]:
//! a material prompt change should bump the version so stored envelopes
//! are selected for reprocessing.

use chrono::NaiveDate;

use focus_core::defaults::CAPABILITY_MAX_CHARS;
use focus_core::{KnownEntities, RawInteraction};

use crate::heuristics::header;

/// Characters of body shown to the classifier.
const CLASSIFY_BODY_CHARS: usize = 500;

pub const CLASSIFICATION_SYSTEM: &str = r#"You classify messages into exactly one category. Respond with JSON only.

Categories (pick the FIRST match):
- spam: cold outreach, sales pitches, recruiter mail, SEO offers, scams. When in doubt between spam and human, pick spam.
- newsletter: marketing, subscriptions, promotions, digests, product announcements, mailing lists.
- system: password resets, 2FA codes, account notifications, security alerts, login confirmations.
- automated: receipts, shipping confirmations, order updates, calendar invites, payment confirmations, app notifications.
- human: a real conversation from someone the recipient knows or works with, with shared context or specific asks.

Also assess:
- urgency: "urgent" / "normal" / "low"
- still_relevant: is this still actionable today? Old messages with no ongoing commitment are not.

Respond ONLY with:
{"label": "human", "confidence": 0.9, "urgency": "normal", "still_relevant": true}"#;

pub const EXTRACTION_SYSTEM: &str = r#"You extract structured data from messages.
Given a message and context about known projects and people, extract actionable information.

Return ONLY valid JSON with these fields:
- tasks: [{description, assigned_to ("me" or name), deadline (ISO date or null), priority ("urgent"/"high"/"normal"/"low"), project (known project slug or null)}]
- commitments: [{description, by ("sender" or "me"), to_whom (name or null), deadline (ISO date or null), project (slug or null)}]
- questions: [{question, context}]
- waiting_on: [{description, from (name), since (ISO date or null)}]
- project_links: [project slugs matching known projects]
- new_projects: [{name, description}] (only if clearly a new distinct project)
- people_mentioned: [names]
- sentiment: "positive" / "neutral" / "negative" / "urgent"
- reply_needed: bool
- reply_urgency: "urgent" / "normal" / "low" / "none"
- suggested_reply: string or null

Resolve relative dates ("Friday", "next week") against today's date.
If the message is more than two weeks old, reply_needed is almost always false.
Only extract what is clearly stated."#;

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn envelope_header(raw: &RawInteraction) -> String {
    let meta = &raw.raw_metadata;
    format!(
        "From: {}\nSubject: {}\nDate: {}",
        header(meta, "from").unwrap_or("unknown"),
        header(meta, "subject").unwrap_or("(no subject)"),
        raw.interaction_date.format("%Y-%m-%d"),
    )
}

pub fn classification_prompt(raw: &RawInteraction, today: NaiveDate) -> String {
    format!(
        "{}\nSource: {}\nBody (first {} chars): {}\n\nToday's date: {}",
        envelope_header(raw),
        raw.source_type,
        CLASSIFY_BODY_CHARS,
        truncate_chars(&raw.raw_content, CLASSIFY_BODY_CHARS),
        today,
    )
}

pub fn extraction_prompt(raw: &RawInteraction, known: &KnownEntities, today: NaiveDate) -> String {
    let mut context = Vec::new();
    if !known.projects.is_empty() {
        context.push(format!("Known projects: {}", known.projects.join(", ")));
    }
    if !known.people.is_empty() {
        context.push(format!("Known people: {}", known.people.join(", ")));
    }
    let context = if context.is_empty() {
        "No known context yet.".to_string()
    } else {
        context.join("\n")
    };

    format!(
        "Context:\n{context}\n\nToday's date: {today} ({weekday})\n\nMessage:\n{header}\n\nBody:\n{body}\n\nExtract structured data from this message as JSON.",
        weekday = today.format("%A"),
        header = envelope_header(raw),
        body = truncate_chars(&raw.raw_content, CAPABILITY_MAX_CHARS),
    )
}
