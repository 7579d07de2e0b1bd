use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tollgate_core::AppError;

use crate::config::DatabaseConfig;
use crate::repository::DedupRepository;

/// Handle on the dedup history database.
///
/// Owns the pool, brings the `dedup_records` schema up to date and hands out
/// [`DedupRepository`] instances that share the pool.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Open a pool against the history database.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, AppError> {
        config.validate()?;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.url)
            .await
            .map_err(|e| {
                AppError::StorageError(format!("Cannot reach dedup history database: {e}"))
            })?;

        tracing::debug!(
            max_connections = config.max_connections,
            "Connected to dedup history database"
        );
        Ok(Self { pool })
    }

    /// Connect and apply pending migrations in one step.
    pub async fn open(config: &DatabaseConfig) -> Result<Self, AppError> {
        let db = Self::connect(config).await?;
        db.migrate().await?;
        Ok(db)
    }

    /// Wrap a pool the caller already owns (test containers, shared pools).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create or upgrade the `dedup_records` table.
    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::StorageError(format!("Dedup history migration failed: {e}")))?;
        tracing::debug!("Dedup history schema is current");
        Ok(())
    }

    pub fn dedup_repo(&self) -> DedupRepository {
        DedupRepository::new(self.pool.clone())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
