//! Lenient parsing of model JSON output.
//!
//! Models wrap JSON in code fences, prepend `<think>` blocks, add prose
//! around the object and emit `null` where an array was asked for. These
//! helpers recover the object; anything still unparseable is an error so
//! the job queue retries it.

use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use focus_core::{Classification, Error, Label, Result, Urgency};

/// Remove `<think>...</think>` blocks. An unclosed block swallows the rest.
pub fn strip_thinking(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("<think>") {
        out.push_str(&rest[..start]);
        match rest[start..].find("</think>") {
            Some(end) => rest = &rest[start + end + "</think>".len()..],
            None => return out,
        }
    }
    out.push_str(rest);
    out
}

/// Remove a surrounding markdown code fence (```` ```json ```` or ```` ``` ````).
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(after_open) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match after_open.find('\n') {
        Some(idx) => &after_open[idx + 1..],
        None => after_open,
    };
    body.trim_end().trim_end_matches("```").trim()
}

/// The outermost `{...}` object in a model response.
pub fn extract_json_object(raw: &str) -> Result<JsonValue> {
    let cleaned = strip_thinking(raw);
    let text = strip_code_fence(&cleaned);

    let start = text
        .find('{')
        .ok_or_else(|| Error::Serialization(format!("no JSON object in response: {}", preview(raw))))?;
    let end = text
        .rfind('}')
        .filter(|end| *end > start)
        .ok_or_else(|| Error::Serialization(format!("unterminated JSON object: {}", preview(raw))))?;

    let value: JsonValue = serde_json::from_str(&text[start..=end])?;
    if !value.is_object() {
        return Err(Error::Serialization("response is not a JSON object".into()));
    }
    Ok(drop_nulls(value))
}

/// Parse a model response into `T`, tolerating the usual model noise.
pub fn parse_lenient<T: DeserializeOwned>(raw: &str) -> Result<T> {
    let value = extract_json_object(raw)?;
    Ok(serde_json::from_value(value)?)
}

/// Remove null object members recursively so `#[serde(default)]` applies.
fn drop_nulls(value: JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(map) => JsonValue::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, drop_nulls(v)))
                .collect(),
        ),
        JsonValue::Array(items) => JsonValue::Array(
            items
                .into_iter()
                .filter(|v| !v.is_null())
                .map(drop_nulls)
                .collect(),
        ),
        other => other,
    }
}

fn preview(raw: &str) -> String {
    raw.chars().take(200).collect()
}

/// Parse a classifier response.
///
/// The label may arrive as `label` or `classification`. An unknown label
/// is treated as a zero-confidence newsletter so a confused model never
/// triggers deep extraction; a response with no JSON at all is an error.
pub fn parse_classification(raw: &str) -> Result<Classification> {
    let value = extract_json_object(raw)?;

    let label = value
        .get("label")
        .or_else(|| value.get("classification"))
        .and_then(JsonValue::as_str)
        .map(|s| s.trim().to_lowercase());

    let (label, confidence) = match label.as_deref().and_then(|s| s.parse::<Label>().ok()) {
        Some(label) => (
            label,
            value
                .get("confidence")
                .and_then(JsonValue::as_f64)
                .unwrap_or(0.5),
        ),
        None => (Label::Newsletter, 0.0),
    };

    let urgency = value
        .get("urgency")
        .and_then(JsonValue::as_str)
        .and_then(|s| s.trim().to_lowercase().parse::<Urgency>().ok())
        .unwrap_or_default();

    let mut classification = Classification::new(label, confidence).with_urgency(urgency);
    classification.route_hint = value
        .get("route_to")
        .or_else(|| value.get("route_hint"))
        .and_then(JsonValue::as_str)
        .map(str::to_string);
    if value.get("still_relevant").and_then(JsonValue::as_bool) == Some(false) {
        classification = classification.not_still_relevant();
    }
    Ok(classification)
}
