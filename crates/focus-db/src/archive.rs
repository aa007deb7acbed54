//! Raw interaction archive.
//!
//! Rows are append-only: the immutable layer is guarded by a trigger, and
//! only the extraction envelope and stage are ever updated.

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::{postgres::PgRow, Pool, Postgres, Row};
use tracing::{debug, info};
use uuid::Uuid;

use focus_core::{
    content_hash, new_v7, ArchiveRepository, Error, ExtractionEnvelope, IngestOutcome,
    IngestRequest, RawInteraction, Result, Stage, UnprocessedCursor,
};

const RAW_COLUMNS: &str = "id, source_type, source_id, account_id, raw_content, raw_metadata,
     content_hash, interaction_date, ingested_at, stage, extraction_version,
     extraction_model, extraction_result, last_processed_at";

/// PostgreSQL implementation of ArchiveRepository.
#[derive(Clone)]
pub struct PgArchiveRepository {
    pool: Pool<Postgres>,
}

impl PgArchiveRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_raw_row(row: PgRow) -> Result<RawInteraction> {
        let stage: String = row.get("stage");
        let version: Option<i32> = row.get("extraction_version");
        let envelope = match version {
            Some(extraction_version) => Some(ExtractionEnvelope {
                extraction_version,
                extraction_model: row
                    .get::<Option<String>, _>("extraction_model")
                    .unwrap_or_default(),
                extraction_result: row
                    .get::<Option<JsonValue>, _>("extraction_result")
                    .unwrap_or(JsonValue::Null),
                last_processed_at: row
                    .get::<Option<chrono::DateTime<Utc>>, _>("last_processed_at")
                    .unwrap_or_else(|| row.get("ingested_at")),
            }),
            None => None,
        };
        Ok(RawInteraction {
            id: row.get("id"),
            source_type: row.get("source_type"),
            source_id: row.get("source_id"),
            account_id: row.get("account_id"),
            raw_content: row.get("raw_content"),
            raw_metadata: row.get("raw_metadata"),
            content_hash: row.get("content_hash"),
            interaction_date: row.get("interaction_date"),
            ingested_at: row.get("ingested_at"),
            stage: stage.parse()?,
            envelope,
        })
    }

    async fn fetch_by_scope_hash(&self, source_type: &str, hash: &str) -> Result<RawInteraction> {
        let row = sqlx::query(&format!(
            "SELECT {RAW_COLUMNS} FROM raw_interaction
             WHERE source_type = $1 AND content_hash = $2"
        ))
        .bind(source_type)
        .bind(hash)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Self::parse_raw_row(row)
    }
}

#[async_trait]
impl ArchiveRepository for PgArchiveRepository {
    async fn ingest(&self, req: IngestRequest) -> Result<IngestOutcome> {
        let hash = content_hash(&req.content);

        // The unique (source_type, content_hash) constraint arbitrates
        // concurrent ingests of the same content.
        let inserted = sqlx::query(&format!(
            "INSERT INTO raw_interaction
                 (id, source_type, source_id, account_id, raw_content, raw_metadata,
                  content_hash, interaction_date, ingested_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (source_type, content_hash) DO NOTHING
             RETURNING {RAW_COLUMNS}"
        ))
        .bind(new_v7())
        .bind(&req.source_type)
        .bind(&req.source_id)
        .bind(req.account_id)
        .bind(&req.content)
        .bind(&req.metadata)
        .bind(&hash)
        .bind(req.occurred_at)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        match inserted {
            Some(row) => {
                let raw = Self::parse_raw_row(row)?;
                info!(
                    subsystem = "archive",
                    op = "ingest",
                    raw_id = %raw.id,
                    source_type = %raw.source_type,
                    "Stored raw interaction"
                );
                Ok(IngestOutcome::Created(raw))
            }
            None => {
                let existing = self.fetch_by_scope_hash(&req.source_type, &hash).await?;
                debug!(
                    subsystem = "archive",
                    op = "ingest",
                    raw_id = %existing.id,
                    source_type = %existing.source_type,
                    "Duplicate content, returning existing row"
                );
                Ok(IngestOutcome::Duplicate(existing))
            }
        }
    }

    async fn get(&self, raw_id: Uuid) -> Result<Option<RawInteraction>> {
        let row = sqlx::query(&format!(
            "SELECT {RAW_COLUMNS} FROM raw_interaction WHERE id = $1"
        ))
        .bind(raw_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        row.map(Self::parse_raw_row).transpose()
    }

    async fn record_extraction(
        &self,
        raw_id: Uuid,
        version: i32,
        model: &str,
        result: &JsonValue,
        stage: Stage,
    ) -> Result<bool> {
        // Conditional on the stored version so a stale worker can never
        // overwrite a newer envelope.
        let updated = sqlx::query(
            "UPDATE raw_interaction
             SET extraction_version = $2, extraction_model = $3, extraction_result = $4,
                 last_processed_at = $5, stage = $6
             WHERE id = $1
               AND (extraction_version IS NULL OR extraction_version <= $2)",
        )
        .bind(raw_id)
        .bind(version)
        .bind(model)
        .bind(result)
        .bind(Utc::now())
        .bind(stage.as_str())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?
        .rows_affected();

        if updated == 1 {
            return Ok(true);
        }

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM raw_interaction WHERE id = $1)")
                .bind(raw_id)
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Database)?;
        if exists {
            debug!(
                subsystem = "archive",
                op = "record_extraction",
                raw_id = %raw_id,
                version,
                "Newer extraction already recorded, skipping"
            );
            Ok(false)
        } else {
            Err(Error::NotFound(format!("raw interaction {raw_id}")))
        }
    }

    async fn select_unprocessed_page(
        &self,
        version_floor: i32,
        after: Option<UnprocessedCursor>,
        limit: i64,
    ) -> Result<Vec<RawInteraction>> {
        let start = Instant::now();
        let (after_date, after_id) = match after {
            Some(c) => (Some(c.interaction_date), Some(c.id)),
            None => (None, None),
        };

        let rows = sqlx::query(&format!(
            "SELECT {RAW_COLUMNS} FROM raw_interaction
             WHERE (extraction_version IS NULL OR extraction_version < $1)
               AND ($2::timestamptz IS NULL OR (interaction_date, id) > ($2, $3))
             ORDER BY interaction_date ASC, id ASC
             LIMIT $4"
        ))
        .bind(version_floor)
        .bind(after_date)
        .bind(after_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let page = rows
            .into_iter()
            .map(Self::parse_raw_row)
            .collect::<Result<Vec<_>>>()?;
        debug!(
            subsystem = "archive",
            op = "select_unprocessed",
            version_floor,
            result_count = page.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Loaded unprocessed page"
        );
        Ok(page)
    }

    async fn count_by_stage(&self) -> Result<HashMap<Stage, i64>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT stage, COUNT(*) FROM raw_interaction GROUP BY stage")
                .fetch_all(&self.pool)
                .await
                .map_err(Error::Database)?;
        rows.into_iter()
            .map(|(stage, count)| Ok((stage.parse::<Stage>()?, count)))
            .collect()
    }
}
