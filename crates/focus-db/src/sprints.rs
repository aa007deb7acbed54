//! Project sprints.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, Pool, Postgres, Row};
use tracing::info;
use uuid::Uuid;

use focus_core::{new_v7, Error, NewSprint, ProjectStatus, Result, Sprint, SprintRepository};

const SPRINT_COLUMNS: &str =
    "id, project_id, name, boost, starts_at, ends_at, auto_archive, is_active, created_at";

/// PostgreSQL implementation of SprintRepository.
#[derive(Clone)]
pub struct PgSprintRepository {
    pool: Pool<Postgres>,
}

impl PgSprintRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub(crate) fn parse_sprint_row(row: &PgRow) -> Sprint {
        Sprint {
            id: row.get("id"),
            project_id: row.get("project_id"),
            name: row.get("name"),
            boost: row.get("boost"),
            starts_at: row.get("starts_at"),
            ends_at: row.get("ends_at"),
            auto_archive: row.get("auto_archive"),
            is_active: row.get("is_active"),
            created_at: row.get("created_at"),
        }
    }

    /// Every sprint, in creation order.
    pub(crate) async fn all(pool: &Pool<Postgres>) -> Result<Vec<Sprint>> {
        let rows = sqlx::query(&format!(
            "SELECT {SPRINT_COLUMNS} FROM sprint ORDER BY created_at, id"
        ))
        .fetch_all(pool)
        .await
        .map_err(Error::Database)?;
        Ok(rows.iter().map(Self::parse_sprint_row).collect())
    }
}

#[async_trait]
impl SprintRepository for PgSprintRepository {
    async fn create_sprint(&self, sprint: NewSprint) -> Result<Sprint> {
        sprint.validate()?;
        let row = sqlx::query(&format!(
            "INSERT INTO sprint (id, project_id, name, boost, starts_at, ends_at, auto_archive, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING {SPRINT_COLUMNS}"
        ))
        .bind(new_v7())
        .bind(sprint.project_id)
        .bind(&sprint.name)
        .bind(sprint.boost)
        .bind(sprint.starts_at)
        .bind(sprint.ends_at)
        .bind(sprint.auto_archive)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        let created = Self::parse_sprint_row(&row);
        info!(
            subsystem = "sprints",
            op = "create",
            sprint_id = %created.id,
            project_id = %created.project_id,
            boost = created.boost,
            "Created sprint"
        );
        Ok(created)
    }

    async fn sprints_for_project(&self, project_id: Uuid) -> Result<Vec<Sprint>> {
        let rows = sqlx::query(&format!(
            "SELECT {SPRINT_COLUMNS} FROM sprint WHERE project_id = $1 ORDER BY created_at, id"
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(rows.iter().map(Self::parse_sprint_row).collect())
    }

    async fn expire_sprints(&self, now: DateTime<Utc>) -> Result<Vec<Sprint>> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let rows = sqlx::query(&format!(
            "UPDATE sprint SET is_active = false
             WHERE is_active AND ends_at < $1
             RETURNING {SPRINT_COLUMNS}"
        ))
        .bind(now)
        .fetch_all(&mut *tx)
        .await
        .map_err(Error::Database)?;
        let expired: Vec<Sprint> = rows.iter().map(Self::parse_sprint_row).collect();

        let archive_projects: Vec<Uuid> = expired
            .iter()
            .filter(|s| s.auto_archive)
            .map(|s| s.project_id)
            .collect();
        if !archive_projects.is_empty() {
            sqlx::query("UPDATE project SET status = $1 WHERE id = ANY($2)")
                .bind(ProjectStatus::Completed.as_str())
                .bind(&archive_projects)
                .execute(&mut *tx)
                .await
                .map_err(Error::Database)?;
        }
        tx.commit().await.map_err(Error::Database)?;

        if !expired.is_empty() {
            info!(
                subsystem = "sprints",
                op = "expire",
                result_count = expired.len(),
                projects_completed = archive_projects.len(),
                "Expired sprints"
            );
        }
        Ok(expired)
    }
}
