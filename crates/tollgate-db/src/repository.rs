use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};
use tollgate_core::error::AppError;
use tollgate_core::models::DedupRecord;
use tollgate_core::traits::DurableStore;

const UPSERT: &str = r#"
    INSERT INTO dedup_records (key, url, payload, first_seen_at)
    VALUES ($1, $2, $3, $4)
    ON CONFLICT (key) DO UPDATE
    SET url = EXCLUDED.url,
        payload = EXCLUDED.payload,
        updated_at = NOW()
"#;

fn storage_error(e: sqlx::Error) -> AppError {
    AppError::StorageError(e.to_string())
}

/// Dedup history persisted in PostgreSQL, one row per dedup key.
///
/// Re-saving a key updates its URL and payload; `first_seen_at` is never
/// overwritten.
#[derive(Clone)]
pub struct DedupRepository {
    pool: Pool<Postgres>,
}

impl DedupRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Number of stored records.
    pub async fn count(&self) -> Result<i64, AppError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM dedup_records")
            .fetch_one(&self.pool)
            .await
            .map_err(storage_error)
    }

    /// Check database connectivity.
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(())
    }
}

impl DurableStore for DedupRepository {
    async fn get(&self, key: &str) -> Result<Option<DedupRecord>, AppError> {
        let row = sqlx::query_as::<_, DedupRow>(
            r#"
            SELECT key, url, payload, first_seen_at
            FROM dedup_records
            WHERE key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(row.map(Into::into))
    }

    async fn put(&self, record: &DedupRecord) -> Result<(), AppError> {
        sqlx::query(UPSERT)
            .bind(&record.key)
            .bind(&record.url)
            .bind(&record.payload)
            .bind(record.first_seen_at)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(())
    }

    async fn put_batch(&self, records: &[DedupRecord]) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;

        for record in records {
            sqlx::query(UPSERT)
                .bind(&record.key)
                .bind(&record.url)
                .bind(&record.payload)
                .bind(record.first_seen_at)
                .execute(&mut *tx)
                .await
                .map_err(storage_error)?;
        }

        tx.commit().await.map_err(storage_error)?;
        tracing::debug!(count = records.len(), "Committed dedup batch");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM dedup_records WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn keys(&self) -> Result<Vec<String>, AppError> {
        sqlx::query_scalar("SELECT key FROM dedup_records")
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct DedupRow {
    key: String,
    url: String,
    payload: serde_json::Value,
    first_seen_at: DateTime<Utc>,
}

impl From<DedupRow> for DedupRecord {
    fn from(row: DedupRow) -> Self {
        Self {
            key: row.key,
            url: row.url,
            payload: row.payload,
            first_seen_at: row.first_seen_at,
        }
    }
}
