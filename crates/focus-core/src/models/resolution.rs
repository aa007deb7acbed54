//! Types exchanged between the resolver and entity storage.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{CommitmentDirection, FactKind, InferredPriority, Person, Project};

/// Every active person and project, with relationship collections loaded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub people: Vec<Person>,
    pub projects: Vec<Project>,
}

impl EntitySnapshot {
    pub fn person(&self, id: Uuid) -> Option<&Person> {
        self.people.iter().find(|p| p.id == id)
    }

    pub fn project(&self, id: Uuid) -> Option<&Project> {
        self.projects.iter().find(|p| p.id == id)
    }

    /// Names handed to the deep extractor as known-entity context.
    pub fn known_entities(&self) -> KnownEntities {
        KnownEntities {
            people: self.people.iter().map(|p| p.name.clone()).collect(),
            projects: self.projects.iter().map(|p| p.slug.clone()).collect(),
        }
    }
}

/// Known-entity context for the deep extraction tier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnownEntities {
    pub people: Vec<String>,
    pub projects: Vec<String>,
}

/// A person the resolver decided to create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPerson {
    pub id: Uuid,
    pub name: String,
    pub name_key: String,
    pub email: Option<String>,
    pub organization: Option<String>,
}

/// Contact details learned for an existing person. Storage only fills
/// columns that are still empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonUpdate {
    pub id: Uuid,
    pub email: Option<String>,
    pub organization: Option<String>,
}

/// A project the resolver decided to create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProject {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
}

/// A task or commitment to upsert, keyed by `(raw_id, kind, fact_key)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactDraft {
    pub kind: FactKind,
    pub fact_key: String,
    pub description: String,
    pub person_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
    pub direction: Option<CommitmentDirection>,
    pub inferred_priority: InferredPriority,
    pub inferred_due: Option<NaiveDate>,
}

/// Everything one resolution pass will write, applied in one transaction.
///
/// Ids of planned entities are provisional: storage may find that a
/// concurrent writer created the same `name_key`/`slug` first and map the
/// planned id onto the existing row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionPlan {
    pub raw_id: Uuid,
    pub source_type: String,
    pub account_id: Option<Uuid>,
    pub occurred_at: DateTime<Utc>,
    pub new_people: Vec<NewPerson>,
    pub new_projects: Vec<NewProject>,
    pub person_updates: Vec<PersonUpdate>,
    /// Every person referenced by the interaction, existing or new.
    pub person_mentions: Vec<Uuid>,
    /// Every project referenced by the interaction, existing or new.
    pub project_mentions: Vec<Uuid>,
    /// `(project_id, person_id)` pairs seen together.
    pub associations: Vec<(Uuid, Uuid)>,
    pub facts: Vec<FactDraft>,
}

impl ResolutionPlan {
    pub fn new(
        raw_id: Uuid,
        source_type: impl Into<String>,
        account_id: Option<Uuid>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            raw_id,
            source_type: source_type.into(),
            account_id,
            occurred_at,
            new_people: Vec::new(),
            new_projects: Vec::new(),
            person_updates: Vec::new(),
            person_mentions: Vec::new(),
            project_mentions: Vec::new(),
            associations: Vec::new(),
            facts: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.person_mentions.is_empty() && self.project_mentions.is_empty() && self.facts.is_empty()
    }
}

/// What storage actually did with a plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionReport {
    pub people_created: usize,
    pub projects_created: usize,
    pub facts_written: usize,
    pub facts_removed: usize,
}
