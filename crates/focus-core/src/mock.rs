//! In-memory repositories and scripted capabilities.
//!
//! [`MemoryStore`] implements every repository trait with the same observable
//! semantics as the PostgreSQL layer (dedupe, leases, conditional updates,
//! user-override preservation), so pipeline and queue behavior can be tested
//! without a database. Its clock can be advanced to exercise leases and
//! backoff.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::archive::content_hash;
use crate::models::*;
use crate::priority::PrioritySnapshot;
use crate::traits::*;
use crate::{new_v7, Error, Result};

#[derive(Default)]
struct State {
    raws: Vec<RawInteraction>,
    people: Vec<Person>,
    projects: Vec<Project>,
    /// (person_id, raw_id)
    person_mentions: HashSet<(Uuid, Uuid)>,
    /// (project_id, raw_id)
    project_mentions: HashSet<(Uuid, Uuid)>,
    facts: Vec<StructuredFact>,
    sprints: Vec<Sprint>,
    accounts: Vec<SourceAccount>,
    jobs: Vec<Job>,
}

impl State {
    fn source_type_of(&self, raw_id: Uuid) -> Option<&str> {
        self.raws
            .iter()
            .find(|r| r.id == raw_id)
            .map(|r| r.source_type.as_str())
    }

    fn refresh_person_signals(&mut self, person_id: Uuid) {
        let raws: Vec<Uuid> = self
            .person_mentions
            .iter()
            .filter(|(p, _)| *p == person_id)
            .map(|(_, r)| *r)
            .collect();
        let sources: HashSet<String> = raws
            .iter()
            .filter_map(|r| self.source_type_of(*r).map(str::to_string))
            .collect();
        if let Some(person) = self.people.iter_mut().find(|p| p.id == person_id) {
            person.mention_count = raws.len() as i32;
            person.source_diversity = sources.len() as i32;
        }
    }

    fn refresh_project_signals(&mut self, project_id: Uuid) {
        let raws: Vec<Uuid> = self
            .project_mentions
            .iter()
            .filter(|(p, _)| *p == project_id)
            .map(|(_, r)| *r)
            .collect();
        let sources: HashSet<String> = raws
            .iter()
            .filter_map(|r| self.source_type_of(*r).map(str::to_string))
            .collect();
        if let Some(project) = self.projects.iter_mut().find(|p| p.id == project_id) {
            project.mention_count = raws.len() as i32;
            project.source_diversity = sources.len() as i32;
        }
    }

    fn associate(&mut self, project_id: Uuid, person_id: Uuid) {
        if let Some(project) = self.projects.iter_mut().find(|p| p.id == project_id) {
            if !project.person_ids.contains(&person_id) {
                project.person_ids.push(person_id);
            }
        }
        if let Some(person) = self.people.iter_mut().find(|p| p.id == person_id) {
            if !person.project_ids.contains(&project_id) {
                person.project_ids.push(project_id);
            }
        }
    }
}

/// In-memory implementation of every repository trait.
pub struct MemoryStore {
    state: Mutex<State>,
    clock_offset: Mutex<chrono::Duration>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            state: Mutex::new(State::default()),
            clock_offset: Mutex::new(chrono::Duration::zero()),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current time as seen by the store.
    pub fn now(&self) -> DateTime<Utc> {
        let offset = *self.clock_offset.lock().unwrap_or_else(|e| e.into_inner());
        Utc::now() + offset
    }

    /// Move the store's clock forward.
    pub fn advance_clock(&self, by: chrono::Duration) {
        let mut offset = self.clock_offset.lock().unwrap_or_else(|e| e.into_inner());
        *offset += by;
    }

    pub fn raw_interactions(&self) -> Vec<RawInteraction> {
        self.lock().raws.clone()
    }

    pub fn people(&self) -> Vec<Person> {
        self.lock().people.clone()
    }

    pub fn projects(&self) -> Vec<Project> {
        self.lock().projects.clone()
    }

    pub fn facts(&self) -> Vec<StructuredFact> {
        self.lock().facts.clone()
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.lock().jobs.clone()
    }

    /// Seed an existing person, as if created by an earlier resolution.
    pub fn insert_person(&self, name: &str, email: Option<&str>) -> Person {
        let person = Person {
            id: new_v7(),
            name: name.to_string(),
            name_key: crate::matching::normalize_name(name),
            email: email.map(str::to_lowercase),
            organization: None,
            status: EntityStatus::Active,
            merged_into: None,
            mention_count: 0,
            source_diversity: 0,
            first_seen: self.now(),
            last_activity: None,
            project_ids: Vec::new(),
        };
        self.lock().people.push(person.clone());
        person
    }

    /// Seed an existing project.
    pub fn insert_project(&self, name: &str) -> Project {
        let project = Project {
            id: new_v7(),
            name: name.to_string(),
            slug: crate::matching::slugify(name),
            description: None,
            status: ProjectStatus::Active,
            entity_status: EntityStatus::Active,
            merged_into: None,
            pinned: false,
            user_priority: None,
            user_deadline: None,
            mention_count: 0,
            source_diversity: 0,
            first_seen: self.now(),
            last_activity: None,
            person_ids: Vec::new(),
        };
        self.lock().projects.push(project.clone());
        project
    }

    fn claim_locked(state: &mut State, idx: usize, now: DateTime<Utc>, lease: chrono::Duration) -> Job {
        let job = &mut state.jobs[idx];
        job.status = JobStatus::Processing;
        job.locked_until = Some(now + lease);
        job.updated_at = now;
        job.clone()
    }
}

#[async_trait]
impl ArchiveRepository for MemoryStore {
    async fn ingest(&self, req: IngestRequest) -> Result<IngestOutcome> {
        let hash = content_hash(&req.content);
        let now = self.now();
        let mut state = self.lock();
        if let Some(existing) = state
            .raws
            .iter()
            .find(|r| r.source_type == req.source_type && r.content_hash == hash)
        {
            return Ok(IngestOutcome::Duplicate(existing.clone()));
        }
        let raw = RawInteraction {
            id: new_v7(),
            source_type: req.source_type,
            source_id: req.source_id,
            account_id: req.account_id,
            raw_content: req.content,
            raw_metadata: req.metadata,
            content_hash: hash,
            interaction_date: req.occurred_at,
            ingested_at: now,
            stage: Stage::Ingested,
            envelope: None,
        };
        state.raws.push(raw.clone());
        Ok(IngestOutcome::Created(raw))
    }

    async fn get(&self, raw_id: Uuid) -> Result<Option<RawInteraction>> {
        Ok(self.lock().raws.iter().find(|r| r.id == raw_id).cloned())
    }

    async fn record_extraction(
        &self,
        raw_id: Uuid,
        version: i32,
        model: &str,
        result: &JsonValue,
        stage: Stage,
    ) -> Result<bool> {
        let now = self.now();
        let mut state = self.lock();
        let raw = state
            .raws
            .iter_mut()
            .find(|r| r.id == raw_id)
            .ok_or_else(|| Error::NotFound(format!("raw interaction {raw_id}")))?;
        if raw
            .envelope
            .as_ref()
            .is_some_and(|env| env.extraction_version > version)
        {
            return Ok(false);
        }
        raw.envelope = Some(ExtractionEnvelope {
            extraction_version: version,
            extraction_model: model.to_string(),
            extraction_result: result.clone(),
            last_processed_at: now,
        });
        raw.stage = stage;
        Ok(true)
    }

    async fn select_unprocessed_page(
        &self,
        version_floor: i32,
        after: Option<UnprocessedCursor>,
        limit: i64,
    ) -> Result<Vec<RawInteraction>> {
        let state = self.lock();
        let mut rows: Vec<RawInteraction> = state
            .raws
            .iter()
            .filter(|r| r.needs_processing(version_floor))
            .filter(|r| {
                after.map_or(true, |c| (r.interaction_date, r.id) > (c.interaction_date, c.id))
            })
            .cloned()
            .collect();
        rows.sort_by_key(|r| (r.interaction_date, r.id));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn count_by_stage(&self) -> Result<HashMap<Stage, i64>> {
        let mut counts = HashMap::new();
        for raw in &self.lock().raws {
            *counts.entry(raw.stage).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

#[async_trait]
impl EntityRepository for MemoryStore {
    async fn load_snapshot(&self) -> Result<EntitySnapshot> {
        let state = self.lock();
        Ok(EntitySnapshot {
            people: state
                .people
                .iter()
                .filter(|p| p.status == EntityStatus::Active)
                .cloned()
                .collect(),
            projects: state
                .projects
                .iter()
                .filter(|p| p.entity_status == EntityStatus::Active)
                .cloned()
                .collect(),
        })
    }

    async fn apply_resolution(&self, plan: &ResolutionPlan) -> Result<ResolutionReport> {
        let now = self.now();
        let mut state = self.lock();
        let mut report = ResolutionReport::default();
        let mut ids: HashMap<Uuid, Uuid> = HashMap::new();

        for new in &plan.new_people {
            let existing = state
                .people
                .iter()
                .find(|p| p.status == EntityStatus::Active && p.name_key == new.name_key)
                .map(|p| p.id);
            match existing {
                Some(id) => {
                    ids.insert(new.id, id);
                }
                None => {
                    state.people.push(Person {
                        id: new.id,
                        name: new.name.clone(),
                        name_key: new.name_key.clone(),
                        email: new.email.clone(),
                        organization: new.organization.clone(),
                        status: EntityStatus::Active,
                        merged_into: None,
                        mention_count: 0,
                        source_diversity: 0,
                        first_seen: plan.occurred_at,
                        last_activity: None,
                        project_ids: Vec::new(),
                    });
                    report.people_created += 1;
                }
            }
        }

        for new in &plan.new_projects {
            let existing = state
                .projects
                .iter()
                .find(|p| p.entity_status == EntityStatus::Active && p.slug == new.slug)
                .map(|p| p.id);
            match existing {
                Some(id) => {
                    ids.insert(new.id, id);
                }
                None => {
                    state.projects.push(Project {
                        id: new.id,
                        name: new.name.clone(),
                        slug: new.slug.clone(),
                        description: new.description.clone(),
                        status: ProjectStatus::Active,
                        entity_status: EntityStatus::Active,
                        merged_into: None,
                        pinned: false,
                        user_priority: None,
                        user_deadline: None,
                        mention_count: 0,
                        source_diversity: 0,
                        first_seen: plan.occurred_at,
                        last_activity: None,
                        person_ids: Vec::new(),
                    });
                    report.projects_created += 1;
                }
            }
        }

        let map = |id: Uuid| ids.get(&id).copied().unwrap_or(id);

        for update in &plan.person_updates {
            if let Some(p) = state.people.iter_mut().find(|p| p.id == map(update.id)) {
                if p.email.is_none() {
                    p.email = update.email.clone();
                }
                if p.organization.is_none() {
                    p.organization = update.organization.clone();
                }
            }
        }

        for person_id in plan.person_mentions.iter().map(|id| map(*id)) {
            state.person_mentions.insert((person_id, plan.raw_id));
            if let Some(p) = state.people.iter_mut().find(|p| p.id == person_id) {
                p.last_activity = p.last_activity.max(Some(plan.occurred_at));
            }
            state.refresh_person_signals(person_id);
        }
        for project_id in plan.project_mentions.iter().map(|id| map(*id)) {
            state.project_mentions.insert((project_id, plan.raw_id));
            if let Some(p) = state.projects.iter_mut().find(|p| p.id == project_id) {
                p.last_activity = p.last_activity.max(Some(plan.occurred_at));
            }
            state.refresh_project_signals(project_id);
        }
        for (project_id, person_id) in &plan.associations {
            state.associate(map(*project_id), map(*person_id));
        }

        let mut kept: HashSet<(FactKind, String)> = HashSet::new();
        for draft in &plan.facts {
            kept.insert((draft.kind, draft.fact_key.clone()));
            let person_id = draft.person_id.map(map);
            let project_id = draft.project_id.map(map);
            match state.facts.iter_mut().find(|f| {
                f.raw_id == plan.raw_id && f.kind == draft.kind && f.fact_key == draft.fact_key
            }) {
                Some(fact) => {
                    fact.description = draft.description.clone();
                    fact.person_id = person_id;
                    fact.project_id = project_id;
                    fact.direction = draft.direction;
                    fact.inferred_priority = draft.inferred_priority;
                    fact.inferred_due = draft.inferred_due;
                    fact.updated_at = now;
                }
                None => state.facts.push(StructuredFact {
                    id: new_v7(),
                    kind: draft.kind,
                    raw_id: plan.raw_id,
                    fact_key: draft.fact_key.clone(),
                    description: draft.description.clone(),
                    person_id,
                    project_id,
                    account_id: plan.account_id,
                    direction: draft.direction,
                    inferred_priority: draft.inferred_priority,
                    inferred_due: draft.inferred_due,
                    inferred_status: FactStatus::Open,
                    pinned: false,
                    user_priority: None,
                    user_deadline: None,
                    user_status: None,
                    created_at: now,
                    updated_at: now,
                }),
            }
            report.facts_written += 1;
        }

        let before = state.facts.len();
        state.facts.retain(|f| {
            f.raw_id != plan.raw_id
                || f.has_user_overrides()
                || kept.contains(&(f.kind, f.fact_key.clone()))
        });
        report.facts_removed = before - state.facts.len();

        Ok(report)
    }

    async fn get_person(&self, id: Uuid) -> Result<Option<Person>> {
        Ok(self.lock().people.iter().find(|p| p.id == id).cloned())
    }

    async fn get_project(&self, id: Uuid) -> Result<Option<Project>> {
        Ok(self.lock().projects.iter().find(|p| p.id == id).cloned())
    }

    async fn merge_people(&self, keep: Uuid, retire: Uuid) -> Result<()> {
        if keep == retire {
            return Err(Error::InvalidInput("cannot merge a person into itself".into()));
        }
        let mut state = self.lock();
        for id in [keep, retire] {
            if !state.people.iter().any(|p| p.id == id) {
                return Err(Error::NotFound(format!("person {id}")));
            }
        }
        let moved: Vec<(Uuid, Uuid)> = state
            .person_mentions
            .iter()
            .filter(|(p, _)| *p == retire)
            .copied()
            .collect();
        for (_, raw_id) in moved {
            state.person_mentions.remove(&(retire, raw_id));
            state.person_mentions.insert((keep, raw_id));
        }
        for fact in state.facts.iter_mut().filter(|f| f.person_id == Some(retire)) {
            fact.person_id = Some(keep);
        }
        let projects = state
            .people
            .iter()
            .find(|p| p.id == retire)
            .map(|p| p.project_ids.clone())
            .unwrap_or_default();
        for project_id in projects {
            if let Some(project) = state.projects.iter_mut().find(|p| p.id == project_id) {
                project.person_ids.retain(|id| *id != retire);
            }
            state.associate(project_id, keep);
        }
        if let Some(person) = state.people.iter_mut().find(|p| p.id == retire) {
            person.status = EntityStatus::Merged;
            person.merged_into = Some(keep);
            person.project_ids.clear();
        }
        state.refresh_person_signals(keep);
        state.refresh_person_signals(retire);
        Ok(())
    }

    async fn merge_projects(&self, keep: Uuid, retire: Uuid) -> Result<()> {
        if keep == retire {
            return Err(Error::InvalidInput("cannot merge a project into itself".into()));
        }
        let mut state = self.lock();
        for id in [keep, retire] {
            if !state.projects.iter().any(|p| p.id == id) {
                return Err(Error::NotFound(format!("project {id}")));
            }
        }
        let moved: Vec<(Uuid, Uuid)> = state
            .project_mentions
            .iter()
            .filter(|(p, _)| *p == retire)
            .copied()
            .collect();
        for (_, raw_id) in moved {
            state.project_mentions.remove(&(retire, raw_id));
            state.project_mentions.insert((keep, raw_id));
        }
        for fact in state.facts.iter_mut().filter(|f| f.project_id == Some(retire)) {
            fact.project_id = Some(keep);
        }
        for sprint in state.sprints.iter_mut().filter(|s| s.project_id == retire) {
            sprint.project_id = keep;
        }
        let people = state
            .projects
            .iter()
            .find(|p| p.id == retire)
            .map(|p| p.person_ids.clone())
            .unwrap_or_default();
        for person_id in people {
            if let Some(person) = state.people.iter_mut().find(|p| p.id == person_id) {
                person.project_ids.retain(|id| *id != retire);
            }
            state.associate(keep, person_id);
        }
        if let Some(project) = state.projects.iter_mut().find(|p| p.id == retire) {
            project.entity_status = EntityStatus::Merged;
            project.merged_into = Some(keep);
            project.person_ids.clear();
        }
        state.refresh_project_signals(keep);
        state.refresh_project_signals(retire);
        Ok(())
    }

    async fn retract_facts(&self, raw_id: Uuid) -> Result<u64> {
        let mut state = self.lock();
        let before = state.facts.len();
        state
            .facts
            .retain(|f| f.raw_id != raw_id || f.has_user_overrides());
        Ok((before - state.facts.len()) as u64)
    }

    async fn facts_for_interaction(&self, raw_id: Uuid) -> Result<Vec<StructuredFact>> {
        Ok(self
            .lock()
            .facts
            .iter()
            .filter(|f| f.raw_id == raw_id)
            .cloned()
            .collect())
    }

    async fn set_fact_overrides(&self, fact_id: Uuid, overrides: &FactOverrides) -> Result<()> {
        let now = self.now();
        let mut state = self.lock();
        let fact = state
            .facts
            .iter_mut()
            .find(|f| f.id == fact_id)
            .ok_or_else(|| Error::NotFound(format!("fact {fact_id}")))?;
        if let Some(pinned) = overrides.pinned {
            fact.pinned = pinned;
        }
        if overrides.priority.is_some() {
            fact.user_priority = overrides.priority;
        }
        if overrides.deadline.is_some() {
            fact.user_deadline = overrides.deadline;
        }
        if overrides.status.is_some() {
            fact.user_status = overrides.status;
        }
        fact.updated_at = now;
        Ok(())
    }

    async fn set_project_overrides(
        &self,
        project_id: Uuid,
        pinned: Option<bool>,
        priority: Option<UserPriority>,
        deadline: Option<NaiveDate>,
    ) -> Result<()> {
        let mut state = self.lock();
        let project = state
            .projects
            .iter_mut()
            .find(|p| p.id == project_id)
            .ok_or_else(|| Error::NotFound(format!("project {project_id}")))?;
        if let Some(pinned) = pinned {
            project.pinned = pinned;
        }
        if priority.is_some() {
            project.user_priority = priority;
        }
        if deadline.is_some() {
            project.user_deadline = deadline;
        }
        Ok(())
    }
}

#[async_trait]
impl SprintRepository for MemoryStore {
    async fn create_sprint(&self, sprint: NewSprint) -> Result<Sprint> {
        sprint.validate()?;
        let created = Sprint {
            id: new_v7(),
            project_id: sprint.project_id,
            name: sprint.name,
            boost: sprint.boost,
            starts_at: sprint.starts_at,
            ends_at: sprint.ends_at,
            auto_archive: sprint.auto_archive,
            is_active: true,
            created_at: self.now(),
        };
        self.lock().sprints.push(created.clone());
        Ok(created)
    }

    async fn sprints_for_project(&self, project_id: Uuid) -> Result<Vec<Sprint>> {
        Ok(self
            .lock()
            .sprints
            .iter()
            .filter(|s| s.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn expire_sprints(&self, now: DateTime<Utc>) -> Result<Vec<Sprint>> {
        let mut state = self.lock();
        let mut expired = Vec::new();
        for sprint in state
            .sprints
            .iter_mut()
            .filter(|s| s.is_active && s.ends_at < now)
        {
            sprint.is_active = false;
            expired.push(sprint.clone());
        }
        for sprint in expired.iter().filter(|s| s.auto_archive) {
            if let Some(project) = state.projects.iter_mut().find(|p| p.id == sprint.project_id) {
                project.status = ProjectStatus::Completed;
            }
        }
        Ok(expired)
    }
}

#[async_trait]
impl AccountRepository for MemoryStore {
    async fn upsert_account(
        &self,
        name: &str,
        source_type: &str,
        priority_weight: f64,
    ) -> Result<SourceAccount> {
        if priority_weight.is_nan() || priority_weight < 0.0 {
            return Err(Error::InvalidInput(format!(
                "account weight must be a non-negative number, got {priority_weight}"
            )));
        }
        let mut state = self.lock();
        if let Some(account) = state.accounts.iter_mut().find(|a| a.name == name) {
            account.source_type = source_type.to_string();
            account.priority_weight = priority_weight;
            return Ok(account.clone());
        }
        let account = SourceAccount {
            id: new_v7(),
            name: name.to_string(),
            source_type: source_type.to_string(),
            priority_weight,
        };
        state.accounts.push(account.clone());
        Ok(account)
    }

    async fn list_accounts(&self) -> Result<Vec<SourceAccount>> {
        Ok(self.lock().accounts.clone())
    }
}

#[async_trait]
impl PriorityRepository for MemoryStore {
    async fn load_priority_snapshot(&self) -> Result<PrioritySnapshot> {
        let state = self.lock();
        let weights = state
            .accounts
            .iter()
            .map(|a| (a.id, a.priority_weight))
            .collect();
        Ok(PrioritySnapshot::assemble(
            &state.projects,
            &state.facts,
            state.sprints.clone(),
            weights,
        ))
    }
}

#[async_trait]
impl JobRepository for MemoryStore {
    async fn enqueue(&self, req: EnqueueRequest) -> Result<EnqueueOutcome> {
        let now = self.now();
        let mut state = self.lock();
        if let Some(key) = &req.dedupe_key {
            if let Some(existing) = state
                .jobs
                .iter()
                .find(|j| j.dedupe_key.as_ref() == Some(key) && !j.status.is_terminal())
            {
                return Ok(EnqueueOutcome::Existing(existing.clone()));
            }
        }
        let job = Job {
            id: new_v7(),
            kind: req.kind,
            dedupe_key: req.dedupe_key,
            payload: req.payload,
            status: JobStatus::Queued,
            priority: req.priority,
            attempts: 0,
            max_attempts: req.max_attempts,
            locked_until: None,
            error_message: None,
            result: None,
            created_at: now,
            updated_at: now,
        };
        state.jobs.push(job.clone());
        Ok(EnqueueOutcome::Created(job))
    }

    async fn claim_next(
        &self,
        kinds: &[JobKind],
        lease: chrono::Duration,
    ) -> Result<Option<Job>> {
        let now = self.now();
        let mut state = self.lock();
        let candidate = state
            .jobs
            .iter()
            .enumerate()
            .filter(|(_, j)| j.is_claimable_at(now))
            .filter(|(_, j)| kinds.is_empty() || kinds.contains(&j.kind))
            .min_by(|(_, a), (_, b)| {
                b.priority
                    .cmp(&a.priority)
                    .then(a.created_at.cmp(&b.created_at))
                    .then(a.id.cmp(&b.id))
            })
            .map(|(idx, _)| idx);
        Ok(candidate.map(|idx| Self::claim_locked(&mut state, idx, now, lease)))
    }

    async fn try_claim(&self, job_id: Uuid, lease: chrono::Duration) -> Result<Option<Job>> {
        let now = self.now();
        let mut state = self.lock();
        let idx = state
            .jobs
            .iter()
            .position(|j| j.id == job_id && j.is_claimable_at(now));
        Ok(idx.map(|idx| Self::claim_locked(&mut state, idx, now, lease)))
    }

    async fn complete(&self, job_id: Uuid, result: Option<JsonValue>) -> Result<()> {
        let now = self.now();
        let mut state = self.lock();
        if let Some(job) = state
            .jobs
            .iter_mut()
            .find(|j| j.id == job_id && j.status == JobStatus::Processing)
        {
            job.status = JobStatus::Done;
            job.result = result;
            job.locked_until = None;
            job.updated_at = now;
        }
        Ok(())
    }

    async fn fail(
        &self,
        job_id: Uuid,
        error: &str,
        backoff: &BackoffPolicy,
    ) -> Result<FailOutcome> {
        let now = self.now();
        let mut state = self.lock();
        let Some(job) = state
            .jobs
            .iter_mut()
            .find(|j| j.id == job_id && j.status == JobStatus::Processing)
        else {
            return Ok(FailOutcome::Ignored);
        };
        job.attempts += 1;
        job.error_message = Some(error.to_string());
        job.updated_at = now;
        if job.attempts < job.max_attempts {
            let retry_at = now + backoff.delay_for(job.attempts);
            job.status = JobStatus::Retry;
            job.locked_until = Some(retry_at);
            Ok(FailOutcome::Retrying { retry_at })
        } else {
            job.status = JobStatus::Failed;
            job.locked_until = None;
            Ok(FailOutcome::Failed)
        }
    }

    async fn fail_permanently(&self, job_id: Uuid, error: &str) -> Result<FailOutcome> {
        let now = self.now();
        let mut state = self.lock();
        let Some(job) = state
            .jobs
            .iter_mut()
            .find(|j| j.id == job_id && j.status == JobStatus::Processing)
        else {
            return Ok(FailOutcome::Ignored);
        };
        job.attempts += 1;
        job.status = JobStatus::Failed;
        job.error_message = Some(error.to_string());
        job.locked_until = None;
        job.updated_at = now;
        Ok(FailOutcome::Failed)
    }

    async fn reclaim_expired_leases(&self, backoff: &BackoffPolicy) -> Result<u64> {
        let now = self.now();
        let mut state = self.lock();
        let mut reclaimed = 0;
        for job in state.jobs.iter_mut().filter(|j| {
            j.status == JobStatus::Processing && j.locked_until.is_some_and(|until| until < now)
        }) {
            job.attempts += 1;
            job.error_message = Some("lease expired".to_string());
            job.updated_at = now;
            if job.attempts < job.max_attempts {
                job.status = JobStatus::Retry;
                job.locked_until = Some(now + backoff.delay_for(job.attempts));
            } else {
                job.status = JobStatus::Failed;
                job.locked_until = None;
            }
            reclaimed += 1;
        }
        Ok(reclaimed)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        Ok(self.lock().jobs.iter().find(|j| j.id == job_id).cloned())
    }

    async fn stats(&self) -> Result<QueueStats> {
        let mut stats = QueueStats::default();
        for job in &self.lock().jobs {
            stats.add(job.status, 1);
        }
        Ok(stats)
    }

    async fn list_failed(&self, limit: i64) -> Result<Vec<Job>> {
        let mut failed: Vec<Job> = self
            .lock()
            .jobs
            .iter()
            .filter(|j| j.status == JobStatus::Failed)
            .cloned()
            .collect();
        failed.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        failed.truncate(limit.max(0) as usize);
        Ok(failed)
    }

    async fn cleanup(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let mut state = self.lock();
        let before = state.jobs.len();
        state
            .jobs
            .retain(|j| !(j.status.is_terminal() && j.updated_at < older_than));
        Ok((before - state.jobs.len()) as u64)
    }
}

// =============================================================================
// SCRIPTED CAPABILITIES
// =============================================================================

/// Classifier answering from content rules, with optional injected failures.
pub struct ScriptedClassifier {
    default: Classification,
    rules: Vec<(String, Classification)>,
    failures_left: AtomicUsize,
    calls: AtomicUsize,
}

impl ScriptedClassifier {
    pub fn new(default: Classification) -> Self {
        Self {
            default,
            rules: Vec::new(),
            failures_left: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    /// Classify content containing `needle` as `classification`.
    pub fn with_rule(mut self, needle: &str, classification: Classification) -> Self {
        self.rules.push((needle.to_string(), classification));
        self
    }

    /// Fail the next `n` calls.
    pub fn failing(self, n: usize) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Classifier for ScriptedClassifier {
    async fn classify(&self, raw: &RawInteraction) -> Result<Classification> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::Classification("scripted classifier failure".into()));
        }
        let picked = self
            .rules
            .iter()
            .find(|(needle, _)| raw.raw_content.contains(needle.as_str()))
            .map(|(_, c)| c)
            .unwrap_or(&self.default);
        Ok(picked.clone().with_classifier("scripted"))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Deep extractor answering from content rules, with optional injected
/// failures. Records the known-entity context of each call.
pub struct ScriptedExtractor {
    default: ExtractionRecord,
    rules: Vec<(String, ExtractionRecord)>,
    failures_left: AtomicUsize,
    calls: AtomicUsize,
    seen_context: Mutex<Vec<KnownEntities>>,
}

impl ScriptedExtractor {
    pub fn new(default: ExtractionRecord) -> Self {
        Self {
            default,
            rules: Vec::new(),
            failures_left: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            seen_context: Mutex::new(Vec::new()),
        }
    }

    pub fn with_rule(mut self, needle: &str, record: ExtractionRecord) -> Self {
        self.rules.push((needle.to_string(), record));
        self
    }

    pub fn failing(self, n: usize) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen_context(&self) -> Vec<KnownEntities> {
        self.seen_context
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl DeepExtractor for ScriptedExtractor {
    async fn extract(
        &self,
        raw: &RawInteraction,
        known: &KnownEntities,
    ) -> Result<ExtractionRecord> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_context
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(known.clone());
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::Extraction("scripted extractor failure".into()));
        }
        Ok(self
            .rules
            .iter()
            .find(|(needle, _)| raw.raw_content.contains(needle.as_str()))
            .map(|(_, r)| r.clone())
            .unwrap_or_else(|| self.default.clone()))
    }

    fn model_name(&self) -> &str {
        "scripted-extractor"
    }
}
