//! Job repository implementation.
//!
//! Claims are a single conditional `UPDATE ... WHERE id = (SELECT ... FOR
//! UPDATE SKIP LOCKED)`, so concurrent workers never lease the same job.
//! Completion and failure only apply to rows still in `processing`; a worker
//! whose lease lapsed and was reclaimed has its late outcome ignored.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{postgres::PgRow, Pool, Postgres, Row};
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use uuid::Uuid;

use focus_core::{
    new_v7, BackoffPolicy, EnqueueOutcome, EnqueueRequest, Error, FailOutcome, Job, JobKind,
    JobRepository, JobStatus, QueueStats, Result,
};

const JOB_COLUMNS: &str = "id, kind, dedupe_key, payload, status, priority, attempts,
     max_attempts, locked_until, error_message, result, created_at, updated_at";

/// PostgreSQL implementation of JobRepository.
#[derive(Clone)]
pub struct PgJobRepository {
    pool: Pool<Postgres>,
    /// Wakes idle workers when a job is enqueued.
    notify: Arc<Notify>,
}

impl PgJobRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            notify: Arc::new(Notify::new()),
        }
    }

    /// Create a repository sharing an existing notify handle.
    pub fn with_notify(pool: Pool<Postgres>, notify: Arc<Notify>) -> Self {
        Self { pool, notify }
    }

    /// Handle workers can wait on for newly enqueued jobs.
    pub fn job_notify(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    fn parse_job_row(row: PgRow) -> Result<Job> {
        let kind: String = row.get("kind");
        let status: String = row.get("status");
        Ok(Job {
            id: row.get("id"),
            kind: kind.parse()?,
            dedupe_key: row.get("dedupe_key"),
            payload: row.get("payload"),
            status: status.parse()?,
            priority: row.get("priority"),
            attempts: row.get("attempts"),
            max_attempts: row.get("max_attempts"),
            locked_until: row.get("locked_until"),
            error_message: row.get("error_message"),
            result: row.get("result"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    async fn find_live_by_dedupe_key(&self, key: &str) -> Result<Option<Job>> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM job
             WHERE dedupe_key = $1 AND status IN ('queued', 'processing', 'retry')"
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        row.map(Self::parse_job_row).transpose()
    }

    fn kind_strings(kinds: &[JobKind]) -> Vec<String> {
        kinds.iter().map(|k| k.as_str().to_string()).collect()
    }
}

#[async_trait]
impl JobRepository for PgJobRepository {
    async fn enqueue(&self, req: EnqueueRequest) -> Result<EnqueueOutcome> {
        let now = Utc::now();

        // The partial unique index on live dedupe keys arbitrates races; a
        // conflicting insert returns nothing and we hand back the live job.
        // Retried because the live job may finish between the two statements.
        for _ in 0..3 {
            let inserted = sqlx::query(&format!(
                "INSERT INTO job (id, kind, dedupe_key, payload, status, priority, attempts,
                                  max_attempts, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, 'queued', $5, 0, $6, $7, $7)
                 ON CONFLICT (dedupe_key)
                     WHERE dedupe_key IS NOT NULL AND status IN ('queued', 'processing', 'retry')
                 DO NOTHING
                 RETURNING {JOB_COLUMNS}"
            ))
            .bind(new_v7())
            .bind(req.kind.as_str())
            .bind(&req.dedupe_key)
            .bind(&req.payload)
            .bind(req.priority)
            .bind(req.max_attempts)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

            if let Some(row) = inserted {
                let job = Self::parse_job_row(row)?;
                debug!(
                    subsystem = "jobs",
                    op = "enqueue",
                    job_id = %job.id,
                    job_kind = %job.kind,
                    "Job enqueued"
                );
                self.notify.notify_waiters();
                return Ok(EnqueueOutcome::Created(job));
            }

            if let Some(key) = &req.dedupe_key {
                if let Some(existing) = self.find_live_by_dedupe_key(key).await? {
                    debug!(
                        subsystem = "jobs",
                        op = "enqueue",
                        job_id = %existing.id,
                        dedupe_key = %key,
                        "Live job with same dedupe key exists"
                    );
                    return Ok(EnqueueOutcome::Existing(existing));
                }
            }
        }

        Err(Error::Job(format!(
            "could not enqueue {} job: dedupe key kept changing state",
            req.kind
        )))
    }

    async fn claim_next(
        &self,
        kinds: &[JobKind],
        lease: chrono::Duration,
    ) -> Result<Option<Job>> {
        let now = Utc::now();
        // Empty array = claim any kind.
        let row = sqlx::query(&format!(
            "UPDATE job
             SET status = 'processing', locked_until = $1, updated_at = $2
             WHERE id = (
                 SELECT id FROM job
                 WHERE status IN ('queued', 'retry')
                   AND (locked_until IS NULL OR locked_until <= $2)
                   AND (cardinality($3::text[]) = 0 OR kind = ANY($3))
                 ORDER BY priority DESC, created_at ASC, id ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(now + lease)
        .bind(now)
        .bind(Self::kind_strings(kinds))
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_job_row).transpose()
    }

    async fn try_claim(&self, job_id: Uuid, lease: chrono::Duration) -> Result<Option<Job>> {
        let now = Utc::now();
        let row = sqlx::query(&format!(
            "UPDATE job
             SET status = 'processing', locked_until = $2, updated_at = $3
             WHERE id = $1
               AND status IN ('queued', 'retry')
               AND (locked_until IS NULL OR locked_until <= $3)
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(job_id)
        .bind(now + lease)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_job_row).transpose()
    }

    async fn complete(&self, job_id: Uuid, result: Option<JsonValue>) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE job
             SET status = 'done', result = $2, locked_until = NULL, updated_at = $3
             WHERE id = $1 AND status = 'processing'",
        )
        .bind(job_id)
        .bind(&result)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?
        .rows_affected();

        if updated == 0 {
            warn!(
                subsystem = "jobs",
                op = "complete",
                job_id = %job_id,
                "Job no longer processing, completion ignored"
            );
        }
        Ok(())
    }

    async fn fail(
        &self,
        job_id: Uuid,
        error: &str,
        backoff: &BackoffPolicy,
    ) -> Result<FailOutcome> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let current: Option<(i32, i32)> = sqlx::query_as(
            "SELECT attempts, max_attempts FROM job
             WHERE id = $1 AND status = 'processing'
             FOR UPDATE",
        )
        .bind(job_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let Some((attempts, max_attempts)) = current else {
            return Ok(FailOutcome::Ignored);
        };
        let attempts = attempts + 1;

        let outcome = if attempts < max_attempts {
            let retry_at = now + backoff.delay_for(attempts);
            sqlx::query(
                "UPDATE job
                 SET status = 'retry', attempts = $2, error_message = $3,
                     locked_until = $4, updated_at = $5
                 WHERE id = $1",
            )
            .bind(job_id)
            .bind(attempts)
            .bind(error)
            .bind(retry_at)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
            FailOutcome::Retrying { retry_at }
        } else {
            sqlx::query(
                "UPDATE job
                 SET status = 'failed', attempts = $2, error_message = $3,
                     locked_until = NULL, updated_at = $4
                 WHERE id = $1",
            )
            .bind(job_id)
            .bind(attempts)
            .bind(error)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
            FailOutcome::Failed
        };

        tx.commit().await.map_err(Error::Database)?;
        Ok(outcome)
    }

    async fn fail_permanently(&self, job_id: Uuid, error: &str) -> Result<FailOutcome> {
        let updated = sqlx::query(
            "UPDATE job
             SET status = 'failed', attempts = attempts + 1, error_message = $2,
                 locked_until = NULL, updated_at = $3
             WHERE id = $1 AND status = 'processing'",
        )
        .bind(job_id)
        .bind(error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?
        .rows_affected();

        Ok(if updated == 0 {
            FailOutcome::Ignored
        } else {
            FailOutcome::Failed
        })
    }

    async fn reclaim_expired_leases(&self, backoff: &BackoffPolicy) -> Result<u64> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let expired: Vec<(Uuid, i32, i32)> = sqlx::query_as(
            "SELECT id, attempts, max_attempts FROM job
             WHERE status = 'processing' AND locked_until < $1
             FOR UPDATE SKIP LOCKED",
        )
        .bind(now)
        .fetch_all(&mut *tx)
        .await
        .map_err(Error::Database)?;

        for (id, attempts, max_attempts) in &expired {
            let attempts = attempts + 1;
            if attempts < *max_attempts {
                sqlx::query(
                    "UPDATE job
                     SET status = 'retry', attempts = $2, error_message = 'lease expired',
                         locked_until = $3, updated_at = $4
                     WHERE id = $1",
                )
                .bind(id)
                .bind(attempts)
                .bind(now + backoff.delay_for(attempts))
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(Error::Database)?;
            } else {
                sqlx::query(
                    "UPDATE job
                     SET status = 'failed', attempts = $2, error_message = 'lease expired',
                         locked_until = NULL, updated_at = $3
                     WHERE id = $1",
                )
                .bind(id)
                .bind(attempts)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(Error::Database)?;
            }
        }

        tx.commit().await.map_err(Error::Database)?;

        let count = expired.len() as u64;
        if count > 0 {
            info!(
                subsystem = "jobs",
                op = "reclaim",
                result_count = count,
                "Reclaimed jobs with expired leases"
            );
        }
        Ok(count)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM job WHERE id = $1"))
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;
        row.map(Self::parse_job_row).transpose()
    }

    async fn stats(&self) -> Result<QueueStats> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM job GROUP BY status")
                .fetch_all(&self.pool)
                .await
                .map_err(Error::Database)?;
        let mut stats = QueueStats::default();
        for (status, count) in rows {
            stats.add(status.parse::<JobStatus>()?, count);
        }
        Ok(stats)
    }

    async fn list_failed(&self, limit: i64) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM job
             WHERE status = 'failed'
             ORDER BY updated_at DESC
             LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        rows.into_iter().map(Self::parse_job_row).collect()
    }

    async fn cleanup(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM job WHERE status IN ('done', 'failed') AND updated_at < $1",
        )
        .bind(older_than)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }
}
