//! # focus-db
//!
//! PostgreSQL database layer for focus.
//!
//! This crate provides:
//! - Connection pool management
//! - The append-only raw interaction archive
//! - Entity, fact, sprint and account storage
//! - The durable lease-based job queue
//!
//! ## Example
//!
//! ```rust,ignore
//! use focus_db::{ArchiveRepository, Database, IngestRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/focus").await?;
//!     db.migrate().await?;
//!
//!     let outcome = db
//!         .archive
//!         .ingest(IngestRequest::new("mail", "Hello, world!", chrono::Utc::now()))
//!         .await?;
//!
//!     println!("Stored raw interaction: {}", outcome.record().id);
//!     Ok(())
//! }
//! ```
pub mod accounts;
pub mod archive;
pub mod entities;
pub mod jobs;
pub mod pool;
pub mod priority;
pub mod sprints;

// Always compiled so integration tests (in tests/) can use the fixtures.
#[cfg(feature = "migrations")]
pub mod test_fixtures;

// Re-export core types
pub use focus_core::*;

pub use accounts::PgAccountRepository;
pub use archive::PgArchiveRepository;
pub use entities::PgEntityRepository;
pub use jobs::PgJobRepository;
pub use pool::{create_pool, create_pool_with_config, PoolConfig};
pub use priority::PgPriorityRepository;
pub use sprints::PgSprintRepository;

/// Combined database context with all repositories.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Append-only raw interaction archive.
    pub archive: PgArchiveRepository,
    /// People, projects and structured facts.
    pub entities: PgEntityRepository,
    /// Project sprints.
    pub sprints: PgSprintRepository,
    /// Source accounts and their weights.
    pub accounts: PgAccountRepository,
    /// Priority snapshot loader.
    pub priority: PgPriorityRepository,
    /// Job queue for background processing.
    pub jobs: PgJobRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            archive: PgArchiveRepository::new(pool.clone()),
            entities: PgEntityRepository::new(pool.clone()),
            sprints: PgSprintRepository::new(pool.clone()),
            accounts: PgAccountRepository::new(pool.clone()),
            priority: PgPriorityRepository::new(pool.clone()),
            jobs: PgJobRepository::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}
