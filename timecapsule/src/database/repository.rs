//! Repository layer for database operations
//!
//! CRUD for letters, the key-value table and backup records.
//! The repository stores whatever it is given; lifecycle rules live in
//! [`crate::lifecycle`] and the services.

use super::models::*;
use crate::error::{AppError, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

const LETTER_COLUMNS: &str = "id, user_id, title, content, mood, created_at, updated_at, \
     delivery_date, is_delivered, is_deleted, deleted_at, images_json";

/// Repository for database operations
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a new letter
    pub async fn insert_letter(&self, letter: &Letter) -> Result<()> {
        let images_json = serde_json::to_string(&letter.images)?;

        sqlx::query(
            r#"
            INSERT INTO letters (id, user_id, title, content, mood, created_at, updated_at,
                                 delivery_date, is_delivered, is_deleted, deleted_at, images_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&letter.id)
        .bind(&letter.user_id)
        .bind(&letter.title)
        .bind(&letter.content)
        .bind(letter.mood.as_str())
        .bind(letter.created_at)
        .bind(letter.updated_at)
        .bind(letter.delivery_date)
        .bind(letter.is_delivered)
        .bind(letter.is_deleted)
        .bind(letter.deleted_at)
        .bind(&images_json)
        .execute(&self.pool)
        .await?;

        tracing::debug!("Inserted letter: {}", letter.id);
        Ok(())
    }

    /// Overwrite every mutable column of an existing letter
    pub async fn save_letter(&self, letter: &Letter) -> Result<()> {
        let images_json = serde_json::to_string(&letter.images)?;

        let rows = sqlx::query(
            r#"
            UPDATE letters
            SET title = ?, content = ?, mood = ?, updated_at = ?, delivery_date = ?,
                is_delivered = ?, is_deleted = ?, deleted_at = ?, images_json = ?
            WHERE id = ?
            "#,
        )
        .bind(&letter.title)
        .bind(&letter.content)
        .bind(letter.mood.as_str())
        .bind(letter.updated_at)
        .bind(letter.delivery_date)
        .bind(letter.is_delivered)
        .bind(letter.is_deleted)
        .bind(letter.deleted_at)
        .bind(&images_json)
        .bind(&letter.id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(AppError::LetterNotFound(letter.id.clone()));
        }

        tracing::debug!("Saved letter: {}", letter.id);
        Ok(())
    }

    /// Insert or replace a letter (used when importing a restored snapshot)
    pub async fn upsert_letter(&self, letter: &Letter) -> Result<()> {
        let images_json = serde_json::to_string(&letter.images)?;

        sqlx::query(
            r#"
            INSERT INTO letters (id, user_id, title, content, mood, created_at, updated_at,
                                 delivery_date, is_delivered, is_deleted, deleted_at, images_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                user_id = excluded.user_id,
                title = excluded.title,
                content = excluded.content,
                mood = excluded.mood,
                updated_at = excluded.updated_at,
                delivery_date = excluded.delivery_date,
                is_delivered = MAX(letters.is_delivered, excluded.is_delivered),
                is_deleted = excluded.is_deleted,
                deleted_at = excluded.deleted_at,
                images_json = excluded.images_json
            "#,
        )
        .bind(&letter.id)
        .bind(&letter.user_id)
        .bind(&letter.title)
        .bind(&letter.content)
        .bind(letter.mood.as_str())
        .bind(letter.created_at)
        .bind(letter.updated_at)
        .bind(letter.delivery_date)
        .bind(letter.is_delivered)
        .bind(letter.is_deleted)
        .bind(letter.deleted_at)
        .bind(&images_json)
        .execute(&self.pool)
        .await?;

        tracing::debug!("Upserted letter: {}", letter.id);
        Ok(())
    }

    /// Get a letter by ID, trashed or not
    pub async fn find_letter(&self, id: &str) -> Result<Option<Letter>> {
        let row = sqlx::query_as::<_, LetterRow>(&format!(
            "SELECT {} FROM letters WHERE id = ?",
            LETTER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Letter::try_from).transpose()
    }

    /// Get a non-deleted letter by ID
    pub async fn get_letter(&self, id: &str) -> Result<Letter> {
        match self.find_letter(id).await? {
            Some(letter) if !letter.is_deleted => Ok(letter),
            _ => Err(AppError::LetterNotFound(id.to_string())),
        }
    }

    /// List non-deleted letters, newest first
    pub async fn list_letters(&self) -> Result<Vec<Letter>> {
        self.query_letters("WHERE is_deleted = 0 ORDER BY created_at DESC")
            .await
    }

    /// List soft-deleted letters, most recently trashed first
    pub async fn list_trash(&self) -> Result<Vec<Letter>> {
        self.query_letters("WHERE is_deleted = 1 ORDER BY deleted_at DESC")
            .await
    }

    /// List every letter including trash
    pub async fn list_all_letters(&self) -> Result<Vec<Letter>> {
        self.query_letters("ORDER BY created_at DESC").await
    }

    async fn query_letters(&self, clause: &str) -> Result<Vec<Letter>> {
        let rows = sqlx::query_as::<_, LetterRow>(&format!(
            "SELECT {} FROM letters {}",
            LETTER_COLUMNS, clause
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Letter::try_from).collect()
    }

    /// Permanently delete a letter row
    pub async fn hard_delete_letter(&self, id: &str) -> Result<()> {
        let rows = sqlx::query("DELETE FROM letters WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if rows == 0 {
            return Err(AppError::LetterNotFound(id.to_string()));
        }

        tracing::debug!("Hard deleted letter: {}", id);
        Ok(())
    }

    /// Key-value get
    pub async fn kv_get(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(value)
    }

    /// Key-value set
    pub async fn kv_set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        tracing::debug!("Set key: {} ({} bytes)", key, value.len());
        Ok(())
    }

    /// Key-value remove
    pub async fn kv_remove(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM kv_store WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;

        tracing::debug!("Removed key: {}", key);
        Ok(())
    }

    /// Record a stored snapshot
    pub async fn record_backup(&self, path: &str, size: i64, checksum: &str) -> Result<Backup> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let backup = sqlx::query_as::<_, Backup>(
            r#"
            INSERT INTO backups (id, timestamp, path, size, checksum)
            VALUES (?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(now)
        .bind(path)
        .bind(size)
        .bind(checksum)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!("Recorded backup: {}", id);
        Ok(backup)
    }

    /// List backups, newest first
    pub async fn list_backups(&self) -> Result<Vec<Backup>> {
        let backups = sqlx::query_as::<_, Backup>(
            r#"
            SELECT * FROM backups ORDER BY timestamp DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(backups)
    }
}
