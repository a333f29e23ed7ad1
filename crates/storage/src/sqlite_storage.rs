//! SQLite storage backend.
//!
//! Keeps one row per `(user_id, form_type)` in the `form_progress` table.
//! Upserts use `INSERT .. ON CONFLICT DO UPDATE`, so a key never has more
//! than one row.

use async_trait::async_trait;
use formkeep_core::{FormData, FormProgress, FormType, Time, UserId};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;

use super::trait_::{ProgressStore, Result, StorageError};

/// SQLite storage implementation.
#[derive(Clone)]
pub struct SqliteStorage {
    /// Database connection pool
    pool: sqlx::SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a database at the given sqlx connection string.
    pub async fn new(db_url: &str) -> Result<Self> {
        let pool = sqlx::SqlitePool::connect(db_url).await.map_err(db_error)?;

        let storage = Self { pool };
        storage.init_schema().await?;

        Ok(storage)
    }

    /// Open (or create) a database file.
    pub async fn new_from_path(path: &Path) -> Result<Self> {
        let url = format!("sqlite://{}?mode=rwc", path.display());
        Self::new(&url).await
    }

    /// Create an in-memory SQLite storage for testing.
    ///
    /// Every pooled connection would see its own empty in-memory database,
    /// so the pool is limited to one connection.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(db_error)?;

        let storage = Self { pool };
        storage.init_schema().await?;

        Ok(storage)
    }

    /// Initialize the database schema.
    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS form_progress (
                user_id TEXT NOT NULL,
                form_type TEXT NOT NULL,
                current_step INTEGER NOT NULL,
                data TEXT NOT NULL,
                is_completed INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (user_id, form_type)
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    fn decode_row(row: &SqliteRow) -> Result<FormProgress> {
        let user_id: String = row.try_get("user_id").map_err(db_error)?;
        let form_type: String = row.try_get("form_type").map_err(db_error)?;
        let current_step: i64 = row.try_get("current_step").map_err(db_error)?;
        let data: String = row.try_get("data").map_err(db_error)?;
        let is_completed: bool = row.try_get("is_completed").map_err(db_error)?;
        let updated_at: String = row.try_get("updated_at").map_err(db_error)?;

        let data: FormData = serde_json::from_str(&data)?;
        let updated_at: Time = chrono::DateTime::parse_from_rfc3339(&updated_at)
            .map_err(|e| StorageError::Database(format!("bad updated_at: {e}")))?
            .with_timezone(&chrono::Utc);
        let current_step = u32::try_from(current_step)
            .map_err(|_| StorageError::Database(format!("bad current_step: {current_step}")))?;

        Ok(FormProgress {
            user_id: UserId::new(user_id),
            form_type: FormType::new(form_type),
            current_step,
            data,
            is_completed,
            updated_at,
        })
    }
}

#[async_trait]
impl ProgressStore for SqliteStorage {
    async fn load(&self, user_id: &UserId, form_type: &FormType) -> Result<Option<FormProgress>> {
        let row = sqlx::query(
            "SELECT user_id, form_type, current_step, data, is_completed, updated_at
            FROM form_progress WHERE user_id = ? AND form_type = ?",
        )
        .bind(user_id.as_str())
        .bind(form_type.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.as_ref().map(Self::decode_row).transpose()
    }

    async fn upsert(&self, record: &FormProgress) -> Result<FormProgress> {
        let mut stored = record.clone();
        stored.updated_at = chrono::Utc::now();
        let data = serde_json::to_string(&stored.data)?;

        sqlx::query(
            "INSERT INTO form_progress (user_id, form_type, current_step, data, is_completed, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (user_id, form_type) DO UPDATE SET
                current_step = excluded.current_step,
                data = excluded.data,
                is_completed = excluded.is_completed,
                updated_at = excluded.updated_at",
        )
        .bind(stored.user_id.as_str())
        .bind(stored.form_type.as_str())
        .bind(i64::from(stored.current_step))
        .bind(data)
        .bind(stored.is_completed)
        .bind(stored.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(stored)
    }

    async fn delete(&self, user_id: &UserId, form_type: &FormType) -> Result<()> {
        sqlx::query("DELETE FROM form_progress WHERE user_id = ? AND form_type = ?")
            .bind(user_id.as_str())
            .bind(form_type.as_str())
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(())
    }

    async fn list(&self, user_id: &UserId) -> Result<Vec<FormProgress>> {
        let rows = sqlx::query(
            "SELECT user_id, form_type, current_step, data, is_completed, updated_at
            FROM form_progress WHERE user_id = ?",
        )
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        let mut records = rows
            .iter()
            .map(Self::decode_row)
            .collect::<Result<Vec<_>>>()?;
        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(records)
    }
}

fn db_error(e: sqlx::Error) -> StorageError {
    StorageError::Database(e.to_string())
}
