//! Repository layer for database operations
//!
//! Collection snapshots, key/value settings and backup records.
//! `Repository` is the durable `CollectionStore` used by every service.

use super::models::*;
use crate::error::Result;
use crate::store::CollectionStore;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

/// Repository for database operations
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Read the JSON snapshot of a collection
    pub async fn load_collection(&self, name: &str) -> Result<Option<String>> {
        let payload: Option<String> =
            sqlx::query_scalar("SELECT payload FROM collections WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;

        Ok(payload)
    }

    /// Upsert the JSON snapshot of a collection
    pub async fn save_collection(&self, name: &str, payload: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO collections (name, payload, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                payload = excluded.payload,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(name)
        .bind(payload)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        tracing::debug!("Saved collection snapshot: {} ({} bytes)", name, payload.len());
        Ok(())
    }

    pub async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(value)
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        tracing::debug!("Set setting: {} = {}", key, value);
        Ok(())
    }

    /// Record a backup
    pub async fn record_backup(&self, path: &str, size: i64, manifest_hash: &str) -> Result<Backup> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let backup = sqlx::query_as::<_, Backup>(
            r#"
            INSERT INTO backups (id, timestamp, path, size, manifest_hash)
            VALUES (?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(now)
        .bind(path)
        .bind(size)
        .bind(manifest_hash)
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

    /// Close every pooled connection
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Flush the WAL into the main database file so it can be copied
    pub async fn checkpoint(&self) -> Result<()> {
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl CollectionStore for Repository {
    async fn load(&self, collection: &str) -> Result<Option<String>> {
        self.load_collection(collection).await
    }

    async fn save(&self, collection: &str, payload: &str) -> Result<()> {
        self.save_collection(collection, payload).await
    }
}
