//! Entity resolution planning.
//!
//! [`Resolver::plan`] maps the unstructured references in one extraction
//! record onto canonical people and projects. It reads only an eagerly
//! loaded [`EntitySnapshot`] and performs no I/O; storage applies the
//! resulting [`ResolutionPlan`] in one transaction.
//!
//! Matching order for people: exact email, exact normalized name, then the
//! best fuzzy name match at or above the person threshold. For projects:
//! exact slug, then the best fuzzy name match. A reference that clears no
//! candidate creates a new entity, which later references in the same pass
//! can match. Candidates keep snapshot order, so an unchanged snapshot
//! always yields the same match.

use std::collections::HashSet;

use tracing::{debug, info};
use uuid::Uuid;

use focus_core::matching::{best_match, normalize_name, parse_sender, slugify, SenderIdentity};
use focus_core::{
    new_v7, parse_model_date, CommitmentDirection, EntitySnapshot, ExtractionRecord, FactDraft,
    FactKind, InferredPriority, NewPerson, NewProject, PersonUpdate, RawInteraction,
    ResolutionPlan, ResolverThresholds,
};

/// Names that refer to the user rather than a third party.
const SELF_REFERENCES: &[&str] = &["me", "i", "myself", "you", "user", "self"];

/// Reference that points at the message sender.
const SENDER_REFERENCE: &str = "sender";

struct PersonCandidate {
    id: Uuid,
    name: String,
    name_key: String,
    email: Option<String>,
}

struct ProjectCandidate {
    id: Uuid,
    name: String,
    slug: String,
}

/// Pure resolution planner.
#[derive(Debug, Clone, Copy, Default)]
pub struct Resolver {
    thresholds: ResolverThresholds,
}

impl Resolver {
    pub fn new(thresholds: ResolverThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> ResolverThresholds {
        self.thresholds
    }

    /// Build the plan for one raw interaction's extraction record.
    pub fn plan(
        &self,
        raw: &RawInteraction,
        record: &ExtractionRecord,
        snapshot: &EntitySnapshot,
    ) -> ResolutionPlan {
        let mut pass = Pass::new(self.thresholds, raw, snapshot);

        let sender = raw
            .metadata_str("from")
            .and_then(parse_sender)
            .and_then(|identity| pass.resolve_sender(&identity));

        let mentioned: Vec<Uuid> = record
            .people_mentioned
            .iter()
            .filter_map(|name| pass.resolve_reference(name, sender))
            .collect();

        for link in &record.project_links {
            pass.resolve_project(link, None);
        }
        for new in &record.new_projects {
            pass.resolve_project(&new.name, new.description.as_deref());
        }

        for task in &record.tasks {
            let person_id = task
                .assigned_to
                .as_deref()
                .and_then(|name| pass.resolve_reference(name, sender));
            let project_id = pass.project_for(task.project.as_deref());
            pass.push_fact(FactDraft {
                kind: FactKind::Task,
                fact_key: normalize_name(&task.description),
                description: task.description.trim().to_string(),
                person_id,
                project_id,
                direction: None,
                inferred_priority: task
                    .priority
                    .as_deref()
                    .map(InferredPriority::parse_lenient)
                    .unwrap_or_default(),
                inferred_due: task.deadline.as_deref().and_then(parse_model_date),
            });
        }

        for commitment in &record.commitments {
            let direction = if commitment
                .by
                .as_deref()
                .is_some_and(|by| by.trim().eq_ignore_ascii_case(SENDER_REFERENCE))
            {
                CommitmentDirection::ToMe
            } else {
                CommitmentDirection::FromMe
            };
            let counterpart = commitment
                .to_whom
                .as_deref()
                .and_then(|name| pass.resolve_reference(name, sender));
            let person_id = match direction {
                CommitmentDirection::ToMe => sender.or(counterpart),
                CommitmentDirection::FromMe => counterpart
                    .or_else(|| mentioned.iter().copied().find(|id| Some(*id) != sender))
                    .or(sender),
            };
            let project_id = pass.project_for(commitment.project.as_deref());
            pass.push_fact(FactDraft {
                kind: FactKind::Commitment,
                fact_key: normalize_name(&commitment.description),
                description: commitment.description.trim().to_string(),
                person_id,
                project_id,
                direction: Some(direction),
                inferred_priority: InferredPriority::Normal,
                inferred_due: commitment.deadline.as_deref().and_then(parse_model_date),
            });
        }

        // Waiting-on items are promises owed to the user.
        for waiting in &record.waiting_on {
            let person_id = waiting
                .from
                .as_deref()
                .and_then(|name| pass.resolve_reference(name, sender))
                .or(sender);
            let project_id = pass.project_for(None);
            pass.push_fact(FactDraft {
                kind: FactKind::Commitment,
                fact_key: normalize_name(&waiting.description),
                description: waiting.description.trim().to_string(),
                person_id,
                project_id,
                direction: Some(CommitmentDirection::ToMe),
                inferred_priority: InferredPriority::Normal,
                inferred_due: None,
            });
        }

        pass.finish()
    }
}

/// Mutable state of one planning pass.
struct Pass {
    thresholds: ResolverThresholds,
    people: Vec<PersonCandidate>,
    projects: Vec<ProjectCandidate>,
    fact_keys: HashSet<(FactKind, String)>,
    plan: ResolutionPlan,
}

impl Pass {
    fn new(thresholds: ResolverThresholds, raw: &RawInteraction, snapshot: &EntitySnapshot) -> Self {
        Self {
            thresholds,
            people: snapshot
                .people
                .iter()
                .map(|p| PersonCandidate {
                    id: p.id,
                    name: p.name.clone(),
                    name_key: p.name_key.clone(),
                    email: p.email.as_ref().map(|e| e.to_lowercase()),
                })
                .collect(),
            projects: snapshot
                .projects
                .iter()
                .map(|p| ProjectCandidate {
                    id: p.id,
                    name: p.name.clone(),
                    slug: p.slug.clone(),
                })
                .collect(),
            fact_keys: HashSet::new(),
            plan: ResolutionPlan::new(
                raw.id,
                raw.source_type.clone(),
                raw.account_id,
                raw.interaction_date,
            ),
        }
    }

    fn resolve_sender(&mut self, identity: &SenderIdentity) -> Option<Uuid> {
        self.resolve_person(
            &identity.name,
            identity.email.as_deref(),
            identity.organization.as_deref(),
        )
    }

    /// Resolve a free-text person reference. Self references resolve to
    /// nothing, `sender` to the sender.
    fn resolve_reference(&mut self, name: &str, sender: Option<Uuid>) -> Option<Uuid> {
        let key = normalize_name(name);
        if key == SENDER_REFERENCE {
            return sender;
        }
        if SELF_REFERENCES.contains(&key.as_str()) {
            return None;
        }
        self.resolve_person(name, None, None)
    }

    fn resolve_person(
        &mut self,
        name: &str,
        email: Option<&str>,
        organization: Option<&str>,
    ) -> Option<Uuid> {
        let name = name.trim();
        let name_key = normalize_name(name);
        let email = email.map(str::to_lowercase);

        let by_email = email.as_deref().and_then(|email| {
            self.people
                .iter()
                .find(|c| c.email.as_deref() == Some(email))
                .map(|c| c.id)
        });

        let found = by_email.or_else(|| {
            if name_key.is_empty() {
                return None;
            }
            let by_name = self
                .people
                .iter()
                .find(|c| c.name_key == name_key)
                .map(|c| c.id)
                .or_else(|| {
                    best_match(name, &self.people, self.thresholds.person, |c| c.name.as_str())
                        .map(|(c, score)| {
                            debug!(reference = name, matched = %c.name, score, "Fuzzy person match");
                            c.id
                        })
                });
            if let (Some(id), Some(email)) = (by_name, email.as_deref()) {
                self.learn_email(id, email, organization);
            }
            by_name
        });

        let id = match found {
            Some(id) => id,
            None if name_key.is_empty() => return None,
            None => {
                let id = new_v7();
                info!(
                    subsystem = "jobs",
                    component = "resolver",
                    raw_id = %self.plan.raw_id,
                    name,
                    email = email.as_deref().unwrap_or(""),
                    "No confident match, planning new person"
                );
                self.plan.new_people.push(NewPerson {
                    id,
                    name: name.to_string(),
                    name_key: name_key.clone(),
                    email: email.clone(),
                    organization: organization.map(str::to_string),
                });
                self.people.push(PersonCandidate {
                    id,
                    name: name.to_string(),
                    name_key,
                    email,
                });
                id
            }
        };

        if !self.plan.person_mentions.contains(&id) {
            self.plan.person_mentions.push(id);
        }
        Some(id)
    }

    /// Record the sender address on a person matched by name, so later mail
    /// from that address resolves by email whatever display name it carries.
    fn learn_email(&mut self, id: Uuid, email: &str, organization: Option<&str>) {
        let Some(candidate) = self.people.iter_mut().find(|c| c.id == id) else {
            return;
        };
        if candidate.email.is_some() {
            return;
        }
        candidate.email = Some(email.to_string());
        if let Some(new) = self.plan.new_people.iter_mut().find(|p| p.id == id) {
            new.email = Some(email.to_string());
            if new.organization.is_none() {
                new.organization = organization.map(str::to_string);
            }
            return;
        }
        self.plan.person_updates.push(PersonUpdate {
            id,
            email: Some(email.to_string()),
            organization: organization.map(str::to_string),
        });
    }

    fn resolve_project(&mut self, name: &str, description: Option<&str>) -> Option<Uuid> {
        let name = name.trim();
        if normalize_name(name).is_empty() {
            return None;
        }
        let slug = slugify(name);

        let found = self
            .projects
            .iter()
            .find(|c| c.slug == slug)
            .map(|c| c.id)
            .or_else(|| {
                best_match(name, &self.projects, self.thresholds.project, |c| c.name.as_str())
                    .map(|(c, score)| {
                        debug!(reference = name, matched = %c.slug, score, "Fuzzy project match");
                        c.id
                    })
            });

        let id = match found {
            Some(id) => id,
            None => {
                let id = new_v7();
                info!(
                    subsystem = "jobs",
                    component = "resolver",
                    raw_id = %self.plan.raw_id,
                    name,
                    slug = %slug,
                    "No confident match, planning new project"
                );
                self.plan.new_projects.push(NewProject {
                    id,
                    name: name.to_string(),
                    slug: slug.clone(),
                    description: description.map(str::to_string),
                });
                self.projects.push(ProjectCandidate {
                    id,
                    name: name.to_string(),
                    slug,
                });
                id
            }
        };

        if !self.plan.project_mentions.contains(&id) {
            self.plan.project_mentions.push(id);
        }
        Some(id)
    }

    /// Explicit project reference, else the first project this interaction
    /// mentions.
    fn project_for(&mut self, reference: Option<&str>) -> Option<Uuid> {
        reference
            .and_then(|name| self.resolve_project(name, None))
            .or_else(|| self.plan.project_mentions.first().copied())
    }

    fn push_fact(&mut self, draft: FactDraft) {
        if draft.fact_key.is_empty() {
            return;
        }
        if self.fact_keys.insert((draft.kind, draft.fact_key.clone())) {
            self.plan.facts.push(draft);
        }
    }

    fn finish(mut self) -> ResolutionPlan {
        for project_id in &self.plan.project_mentions {
            for person_id in &self.plan.person_mentions {
                self.plan.associations.push((*project_id, *person_id));
            }
        }
        debug!(
            subsystem = "jobs",
            component = "resolver",
            op = "plan",
            raw_id = %self.plan.raw_id,
            people = self.plan.person_mentions.len(),
            new_people = self.plan.new_people.len(),
            projects = self.plan.project_mentions.len(),
            new_projects = self.plan.new_projects.len(),
            facts = self.plan.facts.len(),
            "Resolution planned"
        );
        self.plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use focus_core::{
        EntityStatus, ExtractedCommitment, ExtractedTask, NewProjectRef, Person, Project,
        ProjectStatus, Stage, WaitingOn,
    };
    use serde_json::json;

    fn raw(from: &str) -> RawInteraction {
        RawInteraction {
            id: Uuid::new_v4(),
            source_type: "mail".into(),
            source_id: None,
            account_id: None,
            raw_content: String::new(),
            raw_metadata: json!({ "from": from }),
            content_hash: String::new(),
            interaction_date: Utc::now(),
            ingested_at: Utc::now(),
            stage: Stage::Classified,
            envelope: None,
        }
    }

    fn person(name: &str, email: Option<&str>) -> Person {
        Person {
            id: new_v7(),
            name: name.into(),
            name_key: normalize_name(name),
            email: email.map(String::from),
            organization: None,
            status: EntityStatus::Active,
            merged_into: None,
            mention_count: 1,
            source_diversity: 1,
            first_seen: Utc::now(),
            last_activity: None,
            project_ids: vec![],
        }
    }

    fn project(name: &str) -> Project {
        Project {
            id: new_v7(),
            name: name.into(),
            slug: slugify(name),
            description: None,
            status: ProjectStatus::Active,
            entity_status: EntityStatus::Active,
            merged_into: None,
            pinned: false,
            user_priority: None,
            user_deadline: None,
            mention_count: 1,
            source_diversity: 1,
            first_seen: Utc::now(),
            last_activity: None,
            person_ids: vec![],
        }
    }

    fn people(names: &[&str]) -> ExtractionRecord {
        ExtractionRecord {
            people_mentioned: names.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_close_name_matches_existing_person() {
        let sarah = person("Sarah Chen", None);
        let snapshot = EntitySnapshot {
            people: vec![sarah.clone()],
            projects: vec![],
        };
        let plan = Resolver::default().plan(&raw(""), &people(&["Sara Chen"]), &snapshot);
        assert!(plan.new_people.is_empty());
        assert_eq!(plan.person_mentions, vec![sarah.id]);
    }

    #[test]
    fn test_distant_name_creates_person() {
        let snapshot = EntitySnapshot {
            people: vec![person("Sarah Chen", None)],
            projects: vec![],
        };
        let plan = Resolver::default().plan(&raw(""), &people(&["Unrelated Person"]), &snapshot);
        assert_eq!(plan.new_people.len(), 1);
        assert_eq!(plan.new_people[0].name, "Unrelated Person");
        assert_eq!(plan.new_people[0].name_key, "unrelated person");
    }

    #[test]
    fn test_repeated_planning_finds_same_match() {
        let snapshot = EntitySnapshot {
            people: vec![person("Sarah Chen", None), person("Sarah Cohen", None)],
            projects: vec![],
        };
        let resolver = Resolver::default();
        let a = resolver.plan(&raw(""), &people(&["Sara Chen"]), &snapshot);
        let b = resolver.plan(&raw(""), &people(&["Sara Chen"]), &snapshot);
        assert_eq!(a.person_mentions, b.person_mentions);
        assert_eq!(a.person_mentions, vec![snapshot.people[0].id]);
    }

    #[test]
    fn test_email_beats_name() {
        let pat = person("Patricia Jones", Some("pat@acme.io"));
        let snapshot = EntitySnapshot {
            people: vec![person("Pat Smith", None), pat.clone()],
            projects: vec![],
        };
        let plan = Resolver::default().plan(
            &raw("Pat Smith <PAT@acme.io>"),
            &people(&[]),
            &snapshot,
        );
        assert_eq!(plan.person_mentions, vec![pat.id]);
    }

    #[test]
    fn test_name_matched_sender_gains_email() {
        let sara = person("Sara Chen", None);
        let snapshot = EntitySnapshot {
            people: vec![sara.clone()],
            projects: vec![],
        };
        let plan = Resolver::default().plan(
            &raw("Sara Chen <Sara.Chen@initech.com>"),
            &people(&[]),
            &snapshot,
        );
        assert!(plan.new_people.is_empty());
        assert_eq!(plan.person_mentions, vec![sara.id]);
        assert_eq!(
            plan.person_updates,
            vec![PersonUpdate {
                id: sara.id,
                email: Some("sara.chen@initech.com".into()),
                organization: Some("Initech".into()),
            }]
        );
    }

    #[test]
    fn test_known_email_is_not_overwritten() {
        let sara = person("Sara Chen", Some("sara@home.example"));
        let snapshot = EntitySnapshot {
            people: vec![sara.clone()],
            projects: vec![],
        };
        let plan = Resolver::default().plan(
            &raw("Sara Chen <sara.chen@initech.com>"),
            &people(&[]),
            &snapshot,
        );
        assert_eq!(plan.person_mentions, vec![sara.id]);
        assert!(plan.person_updates.is_empty());
    }

    #[test]
    fn test_sender_seeds_email_and_organization() {
        let plan = Resolver::default().plan(
            &raw("\"Dana Wu\" <dana@initech.com>"),
            &people(&[]),
            &EntitySnapshot::default(),
        );
        let dana = &plan.new_people[0];
        assert_eq!(dana.name, "Dana Wu");
        assert_eq!(dana.email.as_deref(), Some("dana@initech.com"));
        assert_eq!(dana.organization.as_deref(), Some("Initech"));
    }

    #[test]
    fn test_new_entity_reused_within_pass() {
        let plan = Resolver::default().plan(
            &raw(""),
            &people(&["Sara", "sara", "Sara."]),
            &EntitySnapshot::default(),
        );
        assert_eq!(plan.new_people.len(), 1);
        assert_eq!(plan.person_mentions.len(), 1);
    }

    #[test]
    fn test_self_references_are_ignored() {
        let plan = Resolver::default().plan(
            &raw(""),
            &people(&["me", "Myself", "I"]),
            &EntitySnapshot::default(),
        );
        assert!(plan.new_people.is_empty());
    }

    #[test]
    fn test_project_slug_match_then_fuzzy() {
        let launch = project("Spring Launch");
        let snapshot = EntitySnapshot {
            people: vec![],
            projects: vec![launch.clone()],
        };
        let record = ExtractionRecord {
            project_links: vec!["spring-launch".into(), "Spring Lunch".into()],
            ..Default::default()
        };
        let plan = Resolver::default().plan(&raw(""), &record, &snapshot);
        assert!(plan.new_projects.is_empty());
        assert_eq!(plan.project_mentions, vec![launch.id]);
    }

    #[test]
    fn test_project_threshold_looser_than_person() {
        let atlas = project("Atlas Migration");
        let dana = person("Dana Whitfield", None);
        let snapshot = EntitySnapshot {
            people: vec![dana.clone()],
            projects: vec![atlas.clone()],
        };
        let record = ExtractionRecord {
            project_links: vec!["Atlas Data Migration".into()],
            people_mentioned: vec!["Dana Wakefield".into()],
            ..Default::default()
        };
        let plan = Resolver::default().plan(&raw(""), &record, &snapshot);
        assert!(plan.new_projects.is_empty());
        assert_eq!(plan.project_mentions, vec![atlas.id]);
        assert_eq!(plan.new_people.len(), 1);
    }

    #[test]
    fn test_new_project_keeps_description() {
        let record = ExtractionRecord {
            new_projects: vec![NewProjectRef {
                name: "Kitchen Remodel".into(),
                description: Some("cabinets and counters".into()),
            }],
            ..Default::default()
        };
        let plan = Resolver::default().plan(&raw(""), &record, &EntitySnapshot::default());
        assert_eq!(plan.new_projects[0].slug, "kitchen-remodel");
        assert_eq!(
            plan.new_projects[0].description.as_deref(),
            Some("cabinets and counters")
        );
    }

    #[test]
    fn test_commitment_direction_and_counterpart() {
        let record = ExtractionRecord {
            commitments: vec![
                ExtractedCommitment {
                    description: "review spec".into(),
                    by: Some("me".into()),
                    deadline: Some("2026-03-06".into()),
                    ..Default::default()
                },
                ExtractedCommitment {
                    description: "send the contract".into(),
                    by: Some("sender".into()),
                    ..Default::default()
                },
            ],
            people_mentioned: vec!["Sara".into()],
            ..Default::default()
        };
        let plan = Resolver::default().plan(
            &raw("Omar Diaz <omar@acme.io>"),
            &record,
            &EntitySnapshot::default(),
        );
        let omar = plan.new_people.iter().find(|p| p.name == "Omar Diaz").unwrap();
        let sara = plan.new_people.iter().find(|p| p.name == "Sara").unwrap();

        let mine = &plan.facts[0];
        assert_eq!(mine.direction, Some(CommitmentDirection::FromMe));
        assert_eq!(mine.person_id, Some(sara.id));
        assert_eq!(mine.inferred_due, parse_model_date("2026-03-06"));

        let theirs = &plan.facts[1];
        assert_eq!(theirs.direction, Some(CommitmentDirection::ToMe));
        assert_eq!(theirs.person_id, Some(omar.id));
    }

    #[test]
    fn test_task_links_first_project_and_parses_priority() {
        let record = ExtractionRecord {
            tasks: vec![ExtractedTask {
                description: "Book the venue!".into(),
                priority: Some("HIGH".into()),
                deadline: Some("not a date".into()),
                ..Default::default()
            }],
            project_links: vec!["offsite".into()],
            ..Default::default()
        };
        let plan = Resolver::default().plan(&raw(""), &record, &EntitySnapshot::default());
        let task = &plan.facts[0];
        assert_eq!(task.fact_key, "book the venue");
        assert_eq!(task.project_id, Some(plan.new_projects[0].id));
        assert_eq!(task.inferred_priority, InferredPriority::High);
        assert!(task.inferred_due.is_none());
    }

    #[test]
    fn test_duplicate_fact_keys_collapse() {
        let record = ExtractionRecord {
            tasks: vec![
                ExtractedTask {
                    description: "Call Bob".into(),
                    ..Default::default()
                },
                ExtractedTask {
                    description: "call bob.".into(),
                    ..Default::default()
                },
                ExtractedTask {
                    description: "  ".into(),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        let plan = Resolver::default().plan(&raw(""), &record, &EntitySnapshot::default());
        assert_eq!(plan.facts.len(), 1);
    }

    #[test]
    fn test_waiting_on_becomes_commitment_to_me() {
        let record = ExtractionRecord {
            waiting_on: vec![WaitingOn {
                description: "signed NDA".into(),
                from: Some("Legal Team".into()),
                since: None,
            }],
            ..Default::default()
        };
        let plan = Resolver::default().plan(&raw(""), &record, &EntitySnapshot::default());
        assert_eq!(plan.facts[0].kind, FactKind::Commitment);
        assert_eq!(plan.facts[0].direction, Some(CommitmentDirection::ToMe));
        assert_eq!(plan.facts[0].person_id, Some(plan.new_people[0].id));
    }

    #[test]
    fn test_associations_pair_people_with_projects() {
        let record = ExtractionRecord {
            people_mentioned: vec!["Sara".into()],
            project_links: vec!["offsite".into()],
            ..Default::default()
        };
        let plan = Resolver::default().plan(
            &raw("Omar <omar@acme.io>"),
            &record,
            &EntitySnapshot::default(),
        );
        assert_eq!(plan.associations.len(), 2);
        let project_id = plan.new_projects[0].id;
        assert!(plan.associations.iter().all(|(p, _)| *p == project_id));
    }
}
