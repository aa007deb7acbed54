//! Source accounts and their priority weights.

use async_trait::async_trait;
use sqlx::{Pool, Postgres};

use focus_core::{new_v7, AccountRepository, Error, Result, SourceAccount};

/// PostgreSQL implementation of AccountRepository.
#[derive(Clone)]
pub struct PgAccountRepository {
    pool: Pool<Postgres>,
}

impl PgAccountRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountRepository for PgAccountRepository {
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
        let (id, name, source_type, priority_weight): (uuid::Uuid, String, String, f64) =
            sqlx::query_as(
                "INSERT INTO source_account (id, name, source_type, priority_weight)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (name) DO UPDATE SET
                     source_type = EXCLUDED.source_type,
                     priority_weight = EXCLUDED.priority_weight
                 RETURNING id, name, source_type, priority_weight",
            )
            .bind(new_v7())
            .bind(name)
            .bind(source_type)
            .bind(priority_weight)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(SourceAccount {
            id,
            name,
            source_type,
            priority_weight,
        })
    }

    async fn list_accounts(&self) -> Result<Vec<SourceAccount>> {
        let rows: Vec<(uuid::Uuid, String, String, f64)> = sqlx::query_as(
            "SELECT id, name, source_type, priority_weight FROM source_account ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(rows
            .into_iter()
            .map(|(id, name, source_type, priority_weight)| SourceAccount {
                id,
                name,
                source_type,
                priority_weight,
            })
            .collect())
    }
}
