use std::{fs, path::PathBuf};

use sqlx::{Row, SqlitePool, migrate::Migrator, sqlite::SqliteConnectOptions};
use thiserror::Error;

use super::backoff::RetryPolicy;
use crate::config::Category;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("XDG data directory is unavailable")]
    MissingDataDir,
}

impl IndexError {
    /// Lock contention is the one transient store failure; everything else
    /// surfaces immediately.
    pub fn is_contention(&self) -> bool {
        match self {
            IndexError::Sqlx(err) => is_lock_contention(err),
            _ => false,
        }
    }
}

fn is_lock_contention(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            let message = db.message().to_ascii_lowercase();
            message.contains("locked") || message.contains("busy")
        }
        _ => false,
    }
}

/// Relational source of truth for category membership. The primary key on
/// `item_id` is what enforces the one-category-per-item invariant.
pub struct FolderIndex {
    pool: SqlitePool,
    retry: RetryPolicy,
}

impl FolderIndex {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn new(database_url: &str) -> Result<Self, IndexError> {
        let pool = SqlitePool::connect(database_url).await?;
        let store = Self::from_pool(pool);
        store.init().await?;
        Ok(store)
    }

    pub async fn open_at(db_path: &std::path::Path) -> Result<Self, IndexError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        let store = Self::from_pool(pool);
        store.init().await?;
        Ok(store)
    }

    pub async fn new_default() -> Result<Self, IndexError> {
        Self::open_at(&default_db_path()?).await
    }

    pub async fn init(&self) -> Result<(), IndexError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    /// Upsert, replacing any prior category for the item. Retried with the
    /// injected policy while the store reports lock contention.
    pub async fn set_category(
        &self,
        item_id: &str,
        category: &Category,
    ) -> Result<(), IndexError> {
        let mut attempt = 0u32;
        loop {
            match self.try_set_category(item_id, category).await {
                Ok(()) => return Ok(()),
                Err(err)
                    if is_lock_contention(&err)
                        && attempt.saturating_add(1) < self.retry.max_attempts() =>
                {
                    tokio::time::sleep(self.retry.delay(attempt)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn try_set_category(
        &self,
        item_id: &str,
        category: &Category,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO folder_status (item_id, category) VALUES (?1, ?2)
             ON CONFLICT(item_id) DO UPDATE SET category = excluded.category",
        )
        .bind(item_id)
        .bind(category.name())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_category(&self, item_id: &str) -> Result<Option<String>, IndexError> {
        let row = sqlx::query("SELECT category FROM folder_status WHERE item_id = ?1")
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(row.try_get("category")?))
    }

    pub async fn list_by_category(&self, category: &Category) -> Result<Vec<String>, IndexError> {
        let rows = sqlx::query(
            "SELECT item_id FROM folder_status WHERE category = ?1 ORDER BY item_id ASC",
        )
        .bind(category.name())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| row.try_get::<String, _>("item_id").map_err(IndexError::from))
            .collect()
    }

    pub async fn all_rows(&self) -> Result<Vec<(String, String)>, IndexError> {
        let rows =
            sqlx::query("SELECT item_id, category FROM folder_status ORDER BY item_id ASC")
                .fetch_all(&self.pool)
                .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push((row.try_get("item_id")?, row.try_get("category")?));
        }
        Ok(out)
    }

    pub async fn is_empty(&self) -> Result<bool, IndexError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM folder_status")
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.try_get("n")?;
        Ok(count == 0)
    }

    pub async fn row_count(&self, item_id: &str) -> Result<i64, IndexError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM folder_status WHERE item_id = ?1")
            .bind(item_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }

    pub async fn set_flag(
        &self,
        item_id: &str,
        flag: &str,
        checked: bool,
    ) -> Result<(), IndexError> {
        sqlx::query(
            "INSERT INTO checkbox_status (item_id, flag, checked) VALUES (?1, ?2, ?3)
             ON CONFLICT(item_id, flag) DO UPDATE SET checked = excluded.checked",
        )
        .bind(item_id)
        .bind(flag)
        .bind(if checked { 1 } else { 0 })
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn count_flagged(&self, category: &Category, flag: &str) -> Result<i64, IndexError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n
             FROM checkbox_status c
             JOIN folder_status f ON f.item_id = c.item_id
             WHERE f.category = ?1 AND c.flag = ?2 AND c.checked = 1",
        )
        .bind(category.name())
        .bind(flag)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("n")?)
    }

    pub async fn set_annotation(
        &self,
        item_id: &str,
        field: &str,
        value: &str,
    ) -> Result<(), IndexError> {
        sqlx::query(
            "INSERT INTO annotation_status (item_id, field, value) VALUES (?1, ?2, ?3)
             ON CONFLICT(item_id, field) DO UPDATE SET value = excluded.value",
        )
        .bind(item_id)
        .bind(field)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_annotation(
        &self,
        item_id: &str,
        field: &str,
    ) -> Result<Option<String>, IndexError> {
        let row =
            sqlx::query("SELECT value FROM annotation_status WHERE item_id = ?1 AND field = ?2")
                .bind(item_id)
                .bind(field)
                .fetch_optional(&self.pool)
                .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(row.try_get("value")?)
    }

    /// Explicit bulk reset; the only way membership rows are ever cleared.
    pub async fn clear_all(&self) -> Result<(), IndexError> {
        sqlx::query("DELETE FROM folder_status")
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM checkbox_status")
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM annotation_status")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn default_db_path() -> Result<PathBuf, IndexError> {
    let mut path = dirs::data_dir().ok_or(IndexError::MissingDataDir)?;
    path.push("mediabox");
    path.push("index.db");
    Ok(path)
}

#[cfg(test)]
#[path = "index_tests.rs"]
mod tests;
