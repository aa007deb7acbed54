//! Capability outputs: classification, deep and lightweight extraction
//! records, and the per-interaction processing record stored in the
//! extraction envelope.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{text_enum, Stage};
use crate::Error;

// =============================================================================
// CLASSIFICATION
// =============================================================================

/// Classification label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    Human,
    Automated,
    Newsletter,
    Spam,
    System,
}

text_enum!(Label {
    Human => "human",
    Automated => "automated",
    Newsletter => "newsletter",
    Spam => "spam",
    System => "system",
});

impl Label {
    pub const ALL: [Label; 5] = [
        Label::Human,
        Label::Automated,
        Label::Newsletter,
        Label::Spam,
        Label::System,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Urgent,
    #[default]
    Normal,
    Low,
}

text_enum!(Urgency {
    Urgent => "urgent",
    Normal => "normal",
    Low => "low",
});

/// Output of the classification capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub label: Label,
    pub confidence: f64,
    #[serde(default)]
    pub urgency: Urgency,
    #[serde(default)]
    pub route_hint: Option<String>,
    /// False when a human message no longer needs attention (already
    /// answered, stale thread). Such items are archived without extraction.
    #[serde(default = "default_true")]
    pub still_relevant: bool,
    /// Model name, or `heuristic` when decided without a model call.
    #[serde(default)]
    pub classifier: String,
}

fn default_true() -> bool {
    true
}

impl Classification {
    pub fn new(label: Label, confidence: f64) -> Self {
        Self {
            label,
            confidence: confidence.clamp(0.0, 1.0),
            urgency: Urgency::Normal,
            route_hint: None,
            still_relevant: true,
            classifier: String::new(),
        }
    }

    pub fn with_urgency(mut self, urgency: Urgency) -> Self {
        self.urgency = urgency;
        self
    }

    pub fn with_classifier(mut self, classifier: impl Into<String>) -> Self {
        self.classifier = classifier.into();
        self
    }

    pub fn not_still_relevant(mut self) -> Self {
        self.still_relevant = false;
        self
    }
}

/// Processing path chosen by the stage router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    DeepExtraction,
    LightExtraction,
    Archive,
    Discard,
}

text_enum!(Route {
    DeepExtraction => "deep_extraction",
    LightExtraction => "light_extraction",
    Archive => "archive",
    Discard => "discard",
});

impl Route {
    /// Fixed routing table.
    pub fn for_label(label: Label) -> Self {
        match label {
            Label::Human => Route::DeepExtraction,
            Label::Automated => Route::LightExtraction,
            Label::Newsletter => Route::Archive,
            Label::Spam | Label::System => Route::Discard,
        }
    }

    /// Route for a classification, honoring the still-relevant flag on
    /// human items.
    pub fn for_classification(classification: &Classification) -> Self {
        match Route::for_label(classification.label) {
            Route::DeepExtraction if !classification.still_relevant => Route::Archive,
            route => route,
        }
    }

    /// Stage reached once this route's work is done, before resolution.
    pub fn terminal_stage(&self) -> Stage {
        match self {
            Route::DeepExtraction => Stage::Extracted,
            Route::LightExtraction => Stage::Parsed,
            Route::Archive => Stage::Archived,
            Route::Discard => Stage::Discarded,
        }
    }
}

// =============================================================================
// DEEP EXTRACTION
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedTask {
    #[serde(alias = "text")]
    pub description: String,
    #[serde(default)]
    pub assigned_to: Option<String>,
    /// ISO date as returned by the model; unparseable values are ignored.
    #[serde(default)]
    pub deadline: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedCommitment {
    #[serde(alias = "text")]
    pub description: String,
    /// `sender` when the author of the message made the promise, `me` when
    /// the user did.
    #[serde(default)]
    pub by: Option<String>,
    #[serde(default)]
    pub to_whom: Option<String>,
    #[serde(default)]
    pub deadline: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpenQuestion {
    #[serde(alias = "text")]
    pub question: String,
    #[serde(default)]
    pub context: Option<String>,
}

/// Something the user is waiting on from someone else.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WaitingOn {
    #[serde(alias = "text")]
    pub description: String,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub since: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewProjectRef {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Structured record returned by the deep extraction tier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRecord {
    #[serde(default)]
    pub tasks: Vec<ExtractedTask>,
    #[serde(default)]
    pub commitments: Vec<ExtractedCommitment>,
    #[serde(default)]
    pub questions: Vec<OpenQuestion>,
    #[serde(default)]
    pub waiting_on: Vec<WaitingOn>,
    #[serde(default)]
    pub project_links: Vec<String>,
    #[serde(default)]
    pub new_projects: Vec<NewProjectRef>,
    #[serde(default)]
    pub people_mentioned: Vec<String>,
    #[serde(default)]
    pub sentiment: Option<String>,
    #[serde(default)]
    pub reply_needed: bool,
    #[serde(default)]
    pub reply_urgency: Option<String>,
    #[serde(default)]
    pub suggested_reply: Option<String>,
}

/// Every extraction field that can name a person or project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityField {
    Tasks,
    Commitments,
    PeopleMentioned,
    ProjectLinks,
    NewProjects,
    WaitingOn,
}

text_enum!(EntityField {
    Tasks => "tasks",
    Commitments => "commitments",
    PeopleMentioned => "people_mentioned",
    ProjectLinks => "project_links",
    NewProjects => "new_projects",
    WaitingOn => "waiting_on",
});

impl EntityField {
    /// Exhaustive list checked by the resolution gate.
    pub const ALL: [EntityField; 6] = [
        EntityField::Tasks,
        EntityField::Commitments,
        EntityField::PeopleMentioned,
        EntityField::ProjectLinks,
        EntityField::NewProjects,
        EntityField::WaitingOn,
    ];
}

impl ExtractionRecord {
    pub fn is_populated(&self, field: EntityField) -> bool {
        match field {
            EntityField::Tasks => !self.tasks.is_empty(),
            EntityField::Commitments => !self.commitments.is_empty(),
            EntityField::PeopleMentioned => !self.people_mentioned.is_empty(),
            EntityField::ProjectLinks => !self.project_links.is_empty(),
            EntityField::NewProjects => !self.new_projects.is_empty(),
            EntityField::WaitingOn => !self.waiting_on.is_empty(),
        }
    }

    pub fn populated_entity_fields(&self) -> Vec<EntityField> {
        EntityField::ALL
            .into_iter()
            .filter(|f| self.is_populated(*f))
            .collect()
    }

    /// Resolution gate: true when any entity-bearing field is populated.
    pub fn requires_resolution(&self) -> bool {
        EntityField::ALL.iter().any(|f| self.is_populated(*f))
    }
}

// =============================================================================
// LIGHTWEIGHT EXTRACTION
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LightCategory {
    Order,
    Shipping,
    Billing,
    Alert,
    Subscription,
    #[default]
    Other,
}

text_enum!(LightCategory {
    Order => "order",
    Shipping => "shipping",
    Billing => "billing",
    Alert => "alert",
    Subscription => "subscription",
    Other => "other",
});

/// Narrow record produced by local pattern matching.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LightExtraction {
    pub category: LightCategory,
    #[serde(default)]
    pub order_numbers: Vec<String>,
    #[serde(default)]
    pub tracking_numbers: Vec<String>,
    #[serde(default)]
    pub amounts: Vec<f64>,
    #[serde(default)]
    pub dates: Vec<String>,
    #[serde(default)]
    pub carriers: Vec<String>,
    #[serde(default)]
    pub statuses: Vec<String>,
}

impl LightExtraction {
    pub fn is_empty(&self) -> bool {
        self.order_numbers.is_empty()
            && self.tracking_numbers.is_empty()
            && self.amounts.is_empty()
            && self.dates.is_empty()
            && self.carriers.is_empty()
            && self.statuses.is_empty()
    }
}

// =============================================================================
// PROCESSING RECORD
// =============================================================================

/// What is stored as `extraction_result` in the envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingRecord {
    pub classification: Classification,
    pub route: Route,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deep: Option<ExtractionRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub light: Option<LightExtraction>,
}

/// Result of one pass of the stage router over one raw interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub raw_id: Uuid,
    pub label: Label,
    pub route: Route,
    pub stage: Stage,
    #[serde(default)]
    pub people_created: usize,
    #[serde(default)]
    pub projects_created: usize,
    #[serde(default)]
    pub facts_written: usize,
}

/// Parse a model-supplied date, accepting ISO dates and datetimes.
pub fn parse_model_date(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(date);
    }
    chrono::DateTime::parse_from_rfc3339(trimmed)
        .ok()
        .map(|dt| dt.date_naive())
        .or_else(|| {
            trimmed
                .get(..10)
                .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
        })
}
