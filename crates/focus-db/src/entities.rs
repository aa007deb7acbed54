//! Person, project and structured fact storage.
//!
//! Resolution plans are applied in a single transaction. Mention counts and
//! source diversity are recomputed from the mention link tables rather than
//! incremented, which keeps reprocessing an interaction idempotent.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sqlx::{postgres::PgRow, PgConnection, Pool, Postgres, Row};
use tracing::{debug, info};
use uuid::Uuid;

use focus_core::{
    new_v7, EntityRepository, EntitySnapshot, EntityStatus, Error, FactOverrides, Person,
    Project, ResolutionPlan, ResolutionReport, Result, StructuredFact, UserPriority,
};

const PERSON_COLUMNS: &str = "id, name, name_key, email, organization, status, merged_into,
     mention_count, source_diversity, first_seen, last_activity";

const PROJECT_COLUMNS: &str = "id, name, slug, description, status, entity_status, merged_into,
     pinned, user_priority, user_deadline, mention_count, source_diversity, first_seen,
     last_activity";

pub(crate) const FACT_COLUMNS: &str = "id, kind, raw_id, fact_key, description, person_id,
     project_id, account_id, direction, inferred_priority, inferred_due, inferred_status,
     pinned, user_priority, user_deadline, user_status, created_at, updated_at";

/// PostgreSQL implementation of EntityRepository.
#[derive(Clone)]
pub struct PgEntityRepository {
    pool: Pool<Postgres>,
}

impl PgEntityRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_person_row(row: &PgRow) -> Result<Person> {
        let status: String = row.get("status");
        Ok(Person {
            id: row.get("id"),
            name: row.get("name"),
            name_key: row.get("name_key"),
            email: row.get("email"),
            organization: row.get("organization"),
            status: status.parse()?,
            merged_into: row.get("merged_into"),
            mention_count: row.get("mention_count"),
            source_diversity: row.get("source_diversity"),
            first_seen: row.get("first_seen"),
            last_activity: row.get("last_activity"),
            project_ids: Vec::new(),
        })
    }

    pub(crate) fn parse_project_row(row: &PgRow) -> Result<Project> {
        let status: String = row.get("status");
        let entity_status: String = row.get("entity_status");
        let user_priority: Option<String> = row.get("user_priority");
        Ok(Project {
            id: row.get("id"),
            name: row.get("name"),
            slug: row.get("slug"),
            description: row.get("description"),
            status: status.parse()?,
            entity_status: entity_status.parse()?,
            merged_into: row.get("merged_into"),
            pinned: row.get("pinned"),
            user_priority: user_priority.as_deref().map(str::parse).transpose()?,
            user_deadline: row.get("user_deadline"),
            mention_count: row.get("mention_count"),
            source_diversity: row.get("source_diversity"),
            first_seen: row.get("first_seen"),
            last_activity: row.get("last_activity"),
            person_ids: Vec::new(),
        })
    }

    pub(crate) fn parse_fact_row(row: &PgRow) -> Result<StructuredFact> {
        let kind: String = row.get("kind");
        let direction: Option<String> = row.get("direction");
        let inferred_priority: String = row.get("inferred_priority");
        let inferred_status: String = row.get("inferred_status");
        let user_priority: Option<String> = row.get("user_priority");
        let user_status: Option<String> = row.get("user_status");
        Ok(StructuredFact {
            id: row.get("id"),
            kind: kind.parse()?,
            raw_id: row.get("raw_id"),
            fact_key: row.get("fact_key"),
            description: row.get("description"),
            person_id: row.get("person_id"),
            project_id: row.get("project_id"),
            account_id: row.get("account_id"),
            direction: direction.as_deref().map(str::parse).transpose()?,
            inferred_priority: inferred_priority.parse()?,
            inferred_due: row.get("inferred_due"),
            inferred_status: inferred_status.parse()?,
            pinned: row.get("pinned"),
            user_priority: user_priority.as_deref().map(str::parse).transpose()?,
            user_deadline: row.get("user_deadline"),
            user_status: user_status.as_deref().map(str::parse).transpose()?,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    /// All project/person association pairs.
    async fn load_links(&self) -> Result<Vec<(Uuid, Uuid)>> {
        sqlx::query_as("SELECT project_id, person_id FROM project_person")
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)
    }

    async fn refresh_person_signals(conn: &mut PgConnection, person_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE person SET
                 mention_count = (SELECT COUNT(*) FROM person_mention WHERE person_id = $1),
                 source_diversity = (
                     SELECT COUNT(DISTINCT r.source_type)
                     FROM person_mention m JOIN raw_interaction r ON r.id = m.raw_id
                     WHERE m.person_id = $1
                 )
             WHERE id = $1",
        )
        .bind(person_id)
        .execute(&mut *conn)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn refresh_project_signals(conn: &mut PgConnection, project_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE project SET
                 mention_count = (SELECT COUNT(*) FROM project_mention WHERE project_id = $1),
                 source_diversity = (
                     SELECT COUNT(DISTINCT r.source_type)
                     FROM project_mention m JOIN raw_interaction r ON r.id = m.raw_id
                     WHERE m.project_id = $1
                 )
             WHERE id = $1",
        )
        .bind(project_id)
        .execute(&mut *conn)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn lock_entity(conn: &mut PgConnection, table: &str, id: Uuid) -> Result<()> {
        let found: Option<Uuid> =
            sqlx::query_scalar(&format!("SELECT id FROM {table} WHERE id = $1 FOR UPDATE"))
                .bind(id)
                .fetch_optional(&mut *conn)
                .await
                .map_err(Error::Database)?;
        match found {
            Some(_) => Ok(()),
            None => Err(Error::NotFound(format!("{table} {id}"))),
        }
    }
}

#[async_trait]
impl EntityRepository for PgEntityRepository {
    async fn load_snapshot(&self) -> Result<EntitySnapshot> {
        let people_rows = sqlx::query(&format!(
            "SELECT {PERSON_COLUMNS} FROM person WHERE status = 'active' ORDER BY first_seen, id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        let project_rows = sqlx::query(&format!(
            "SELECT {PROJECT_COLUMNS} FROM project
             WHERE entity_status = 'active' ORDER BY first_seen, id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let mut people = people_rows
            .iter()
            .map(Self::parse_person_row)
            .collect::<Result<Vec<_>>>()?;
        let mut projects = project_rows
            .iter()
            .map(Self::parse_project_row)
            .collect::<Result<Vec<_>>>()?;

        // Eagerly attach relationship collections.
        let mut by_project: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        let mut by_person: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for (project_id, person_id) in self.load_links().await? {
            by_project.entry(project_id).or_default().push(person_id);
            by_person.entry(person_id).or_default().push(project_id);
        }
        for person in &mut people {
            person.project_ids = by_person.remove(&person.id).unwrap_or_default();
        }
        for project in &mut projects {
            project.person_ids = by_project.remove(&project.id).unwrap_or_default();
        }

        debug!(
            subsystem = "entities",
            op = "load_snapshot",
            people = people.len(),
            projects = projects.len(),
            "Loaded entity snapshot"
        );
        Ok(EntitySnapshot { people, projects })
    }

    async fn apply_resolution(&self, plan: &ResolutionPlan) -> Result<ResolutionReport> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let mut report = ResolutionReport::default();
        // Planned ids that lost a race to a concurrently created entity.
        let mut ids: HashMap<Uuid, Uuid> = HashMap::new();

        for new in &plan.new_people {
            let created: Option<Uuid> = sqlx::query_scalar(
                "INSERT INTO person (id, name, name_key, email, organization, first_seen)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 ON CONFLICT (name_key) WHERE status = 'active' DO NOTHING
                 RETURNING id",
            )
            .bind(new.id)
            .bind(&new.name)
            .bind(&new.name_key)
            .bind(&new.email)
            .bind(&new.organization)
            .bind(plan.occurred_at)
            .fetch_optional(&mut *tx)
            .await
            .map_err(Error::Database)?;
            match created {
                Some(_) => report.people_created += 1,
                None => {
                    let existing: Uuid = sqlx::query_scalar(
                        "SELECT id FROM person WHERE name_key = $1 AND status = 'active'",
                    )
                    .bind(&new.name_key)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(Error::Database)?;
                    ids.insert(new.id, existing);
                }
            }
        }

        for new in &plan.new_projects {
            let created: Option<Uuid> = sqlx::query_scalar(
                "INSERT INTO project (id, name, slug, description, first_seen)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (slug) WHERE entity_status = 'active' DO NOTHING
                 RETURNING id",
            )
            .bind(new.id)
            .bind(&new.name)
            .bind(&new.slug)
            .bind(&new.description)
            .bind(plan.occurred_at)
            .fetch_optional(&mut *tx)
            .await
            .map_err(Error::Database)?;
            match created {
                Some(_) => report.projects_created += 1,
                None => {
                    let existing: Uuid = sqlx::query_scalar(
                        "SELECT id FROM project WHERE slug = $1 AND entity_status = 'active'",
                    )
                    .bind(&new.slug)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(Error::Database)?;
                    ids.insert(new.id, existing);
                }
            }
        }

        let map = |id: Uuid| ids.get(&id).copied().unwrap_or(id);

        for update in &plan.person_updates {
            sqlx::query(
                "UPDATE person SET email = COALESCE(email, $2),
                     organization = COALESCE(organization, $3)
                 WHERE id = $1",
            )
            .bind(map(update.id))
            .bind(&update.email)
            .bind(&update.organization)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        for person_id in plan.person_mentions.iter().map(|id| map(*id)) {
            sqlx::query(
                "INSERT INTO person_mention (person_id, raw_id) VALUES ($1, $2)
                 ON CONFLICT DO NOTHING",
            )
            .bind(person_id)
            .bind(plan.raw_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
            sqlx::query(
                "UPDATE person SET last_activity = GREATEST(COALESCE(last_activity, $2), $2)
                 WHERE id = $1",
            )
            .bind(person_id)
            .bind(plan.occurred_at)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
            Self::refresh_person_signals(&mut tx, person_id).await?;
        }

        for project_id in plan.project_mentions.iter().map(|id| map(*id)) {
            sqlx::query(
                "INSERT INTO project_mention (project_id, raw_id) VALUES ($1, $2)
                 ON CONFLICT DO NOTHING",
            )
            .bind(project_id)
            .bind(plan.raw_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
            sqlx::query(
                "UPDATE project SET last_activity = GREATEST(COALESCE(last_activity, $2), $2)
                 WHERE id = $1",
            )
            .bind(project_id)
            .bind(plan.occurred_at)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
            Self::refresh_project_signals(&mut tx, project_id).await?;
        }

        for (project_id, person_id) in &plan.associations {
            sqlx::query(
                "INSERT INTO project_person (project_id, person_id) VALUES ($1, $2)
                 ON CONFLICT DO NOTHING",
            )
            .bind(map(*project_id))
            .bind(map(*person_id))
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        let now = Utc::now();
        let mut kept_kinds: Vec<String> = Vec::with_capacity(plan.facts.len());
        let mut kept_keys: Vec<String> = Vec::with_capacity(plan.facts.len());
        for draft in &plan.facts {
            // AI-inferred columns are replaced; user-owned columns are never
            // part of the update set.
            sqlx::query(
                "INSERT INTO structured_fact
                     (id, kind, raw_id, fact_key, description, person_id, project_id,
                      account_id, direction, inferred_priority, inferred_due, created_at,
                      updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $12)
                 ON CONFLICT (raw_id, kind, fact_key) DO UPDATE SET
                     description = EXCLUDED.description,
                     person_id = EXCLUDED.person_id,
                     project_id = EXCLUDED.project_id,
                     direction = EXCLUDED.direction,
                     inferred_priority = EXCLUDED.inferred_priority,
                     inferred_due = EXCLUDED.inferred_due,
                     updated_at = EXCLUDED.updated_at",
            )
            .bind(new_v7())
            .bind(draft.kind.as_str())
            .bind(plan.raw_id)
            .bind(&draft.fact_key)
            .bind(&draft.description)
            .bind(draft.person_id.map(map))
            .bind(draft.project_id.map(map))
            .bind(plan.account_id)
            .bind(draft.direction.map(|d| d.as_str()))
            .bind(draft.inferred_priority.as_str())
            .bind(draft.inferred_due)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
            kept_kinds.push(draft.kind.as_str().to_string());
            kept_keys.push(draft.fact_key.clone());
            report.facts_written += 1;
        }

        // Facts the latest extraction no longer produces go away unless the
        // user has touched them.
        let removed = sqlx::query(
            "DELETE FROM structured_fact
             WHERE raw_id = $1
               AND NOT pinned
               AND user_priority IS NULL
               AND user_deadline IS NULL
               AND user_status IS NULL
               AND (kind, fact_key) NOT IN (
                   SELECT k, f FROM UNNEST($2::text[], $3::text[]) AS t(k, f)
               )",
        )
        .bind(plan.raw_id)
        .bind(&kept_kinds)
        .bind(&kept_keys)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?
        .rows_affected();
        report.facts_removed = removed as usize;

        tx.commit().await.map_err(Error::Database)?;

        info!(
            subsystem = "entities",
            op = "apply_resolution",
            raw_id = %plan.raw_id,
            people_created = report.people_created,
            projects_created = report.projects_created,
            facts_written = report.facts_written,
            facts_removed = report.facts_removed,
            "Applied resolution plan"
        );
        Ok(report)
    }

    async fn get_person(&self, id: Uuid) -> Result<Option<Person>> {
        let row = sqlx::query(&format!("SELECT {PERSON_COLUMNS} FROM person WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut person = Self::parse_person_row(&row)?;
        person.project_ids =
            sqlx::query_scalar("SELECT project_id FROM project_person WHERE person_id = $1")
                .bind(id)
                .fetch_all(&self.pool)
                .await
                .map_err(Error::Database)?;
        Ok(Some(person))
    }

    async fn get_project(&self, id: Uuid) -> Result<Option<Project>> {
        let row = sqlx::query(&format!("SELECT {PROJECT_COLUMNS} FROM project WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut project = Self::parse_project_row(&row)?;
        project.person_ids =
            sqlx::query_scalar("SELECT person_id FROM project_person WHERE project_id = $1")
                .bind(id)
                .fetch_all(&self.pool)
                .await
                .map_err(Error::Database)?;
        Ok(Some(project))
    }

    async fn merge_people(&self, keep: Uuid, retire: Uuid) -> Result<()> {
        if keep == retire {
            return Err(Error::InvalidInput("cannot merge a person into itself".into()));
        }
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        Self::lock_entity(&mut tx, "person", keep).await?;
        Self::lock_entity(&mut tx, "person", retire).await?;

        sqlx::query(
            "INSERT INTO person_mention (person_id, raw_id)
             SELECT $1, raw_id FROM person_mention WHERE person_id = $2
             ON CONFLICT DO NOTHING",
        )
        .bind(keep)
        .bind(retire)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;
        sqlx::query("DELETE FROM person_mention WHERE person_id = $1")
            .bind(retire)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        sqlx::query(
            "INSERT INTO project_person (project_id, person_id)
             SELECT project_id, $1 FROM project_person WHERE person_id = $2
             ON CONFLICT DO NOTHING",
        )
        .bind(keep)
        .bind(retire)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;
        sqlx::query("DELETE FROM project_person WHERE person_id = $1")
            .bind(retire)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        sqlx::query("UPDATE structured_fact SET person_id = $1 WHERE person_id = $2")
            .bind(keep)
            .bind(retire)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        sqlx::query(
            "UPDATE person SET status = $2, merged_into = $3 WHERE id = $1",
        )
        .bind(retire)
        .bind(EntityStatus::Merged.as_str())
        .bind(keep)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;
        Self::refresh_person_signals(&mut tx, keep).await?;
        Self::refresh_person_signals(&mut tx, retire).await?;

        tx.commit().await.map_err(Error::Database)?;
        info!(
            subsystem = "entities",
            op = "merge_people",
            keep = %keep,
            retire = %retire,
            "Merged person records"
        );
        Ok(())
    }

    async fn merge_projects(&self, keep: Uuid, retire: Uuid) -> Result<()> {
        if keep == retire {
            return Err(Error::InvalidInput("cannot merge a project into itself".into()));
        }
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        Self::lock_entity(&mut tx, "project", keep).await?;
        Self::lock_entity(&mut tx, "project", retire).await?;

        sqlx::query(
            "INSERT INTO project_mention (project_id, raw_id)
             SELECT $1, raw_id FROM project_mention WHERE project_id = $2
             ON CONFLICT DO NOTHING",
        )
        .bind(keep)
        .bind(retire)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;
        sqlx::query("DELETE FROM project_mention WHERE project_id = $1")
            .bind(retire)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        sqlx::query(
            "INSERT INTO project_person (project_id, person_id)
             SELECT $1, person_id FROM project_person WHERE project_id = $2
             ON CONFLICT DO NOTHING",
        )
        .bind(keep)
        .bind(retire)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;
        sqlx::query("DELETE FROM project_person WHERE project_id = $1")
            .bind(retire)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        sqlx::query("UPDATE structured_fact SET project_id = $1 WHERE project_id = $2")
            .bind(keep)
            .bind(retire)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        sqlx::query("UPDATE sprint SET project_id = $1 WHERE project_id = $2")
            .bind(keep)
            .bind(retire)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        sqlx::query("UPDATE project SET entity_status = $2, merged_into = $3 WHERE id = $1")
            .bind(retire)
            .bind(EntityStatus::Merged.as_str())
            .bind(keep)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        Self::refresh_project_signals(&mut tx, keep).await?;
        Self::refresh_project_signals(&mut tx, retire).await?;

        tx.commit().await.map_err(Error::Database)?;
        info!(
            subsystem = "entities",
            op = "merge_projects",
            keep = %keep,
            retire = %retire,
            "Merged project records"
        );
        Ok(())
    }

    async fn retract_facts(&self, raw_id: Uuid) -> Result<u64> {
        let removed = sqlx::query(
            "DELETE FROM structured_fact
             WHERE raw_id = $1
               AND NOT pinned
               AND user_priority IS NULL
               AND user_deadline IS NULL
               AND user_status IS NULL",
        )
        .bind(raw_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?
        .rows_affected();
        if removed > 0 {
            info!(
                subsystem = "entities",
                op = "retract_facts",
                raw_id = %raw_id,
                facts_removed = removed,
                "Retracted stale facts"
            );
        }
        Ok(removed)
    }

    async fn facts_for_interaction(&self, raw_id: Uuid) -> Result<Vec<StructuredFact>> {
        let rows = sqlx::query(&format!(
            "SELECT {FACT_COLUMNS} FROM structured_fact WHERE raw_id = $1 ORDER BY created_at, id"
        ))
        .bind(raw_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        rows.iter().map(Self::parse_fact_row).collect()
    }

    async fn set_fact_overrides(&self, fact_id: Uuid, overrides: &FactOverrides) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE structured_fact SET
                 pinned = COALESCE($2, pinned),
                 user_priority = COALESCE($3, user_priority),
                 user_deadline = COALESCE($4, user_deadline),
                 user_status = COALESCE($5, user_status),
                 updated_at = $6
             WHERE id = $1",
        )
        .bind(fact_id)
        .bind(overrides.pinned)
        .bind(overrides.priority.map(|p| p.as_str()))
        .bind(overrides.deadline)
        .bind(overrides.status.map(|s| s.as_str()))
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?
        .rows_affected();
        if updated == 0 {
            return Err(Error::NotFound(format!("fact {fact_id}")));
        }
        Ok(())
    }

    async fn set_project_overrides(
        &self,
        project_id: Uuid,
        pinned: Option<bool>,
        priority: Option<UserPriority>,
        deadline: Option<NaiveDate>,
    ) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE project SET
                 pinned = COALESCE($2, pinned),
                 user_priority = COALESCE($3, user_priority),
                 user_deadline = COALESCE($4, user_deadline)
             WHERE id = $1",
        )
        .bind(project_id)
        .bind(pinned)
        .bind(priority.map(|p| p.as_str()))
        .bind(deadline)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?
        .rows_affected();
        if updated == 0 {
            return Err(Error::NotFound(format!("project {project_id}")));
        }
        Ok(())
    }
}
