//! Eager loader for priority engine inputs.
//!
//! The engine is pure; everything it reads is fetched here in a handful of
//! queries so ranking never touches the database.

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use sqlx::{Pool, Postgres};
use tracing::debug;
use uuid::Uuid;

use focus_core::{Error, PriorityRepository, PrioritySnapshot, Result};

use crate::entities::{PgEntityRepository, FACT_COLUMNS};
use crate::sprints::PgSprintRepository;

/// PostgreSQL implementation of PriorityRepository.
#[derive(Clone)]
pub struct PgPriorityRepository {
    pool: Pool<Postgres>,
}

impl PgPriorityRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PriorityRepository for PgPriorityRepository {
    async fn load_priority_snapshot(&self) -> Result<PrioritySnapshot> {
        let start = Instant::now();

        let project_rows = sqlx::query(
            "SELECT id, name, slug, description, status, entity_status, merged_into, pinned,
                    user_priority, user_deadline, mention_count, source_diversity, first_seen,
                    last_activity
             FROM project
             WHERE entity_status = 'active' AND status = 'active'",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        let mut projects = project_rows
            .iter()
            .map(PgEntityRepository::parse_project_row)
            .collect::<Result<Vec<_>>>()?;

        let links: Vec<(Uuid, Uuid)> =
            sqlx::query_as("SELECT project_id, person_id FROM project_person")
                .fetch_all(&self.pool)
                .await
                .map_err(Error::Database)?;
        let mut by_project: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for (project_id, person_id) in links {
            by_project.entry(project_id).or_default().push(person_id);
        }
        for project in &mut projects {
            project.person_ids = by_project.remove(&project.id).unwrap_or_default();
        }

        let fact_rows = sqlx::query(&format!(
            "SELECT {FACT_COLUMNS} FROM structured_fact
             WHERE COALESCE(user_status, inferred_status) = 'open'"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        let facts = fact_rows
            .iter()
            .map(PgEntityRepository::parse_fact_row)
            .collect::<Result<Vec<_>>>()?;

        let sprints = PgSprintRepository::all(&self.pool).await?;

        let weights: Vec<(Uuid, f64)> =
            sqlx::query_as("SELECT id, priority_weight FROM source_account")
                .fetch_all(&self.pool)
                .await
                .map_err(Error::Database)?;

        let snapshot =
            PrioritySnapshot::assemble(&projects, &facts, sprints, weights.into_iter().collect());
        debug!(
            subsystem = "priority",
            op = "load_snapshot",
            projects = snapshot.projects.len(),
            facts = snapshot.facts.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Loaded priority snapshot"
        );
        Ok(snapshot)
    }
}
