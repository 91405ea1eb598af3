//! SQLite persistence
//!
//! One database file per data directory holds three tables:
//! - `collections`: the JSON snapshot of each entity collection, one row per name
//! - `settings`: small key/value pairs such as the backup retention count
//! - `backups`: a record of every archive the backup service wrote

pub mod models;
pub mod repository;
pub mod schema;

pub use models::*;
pub use repository::Repository;
pub use schema::initialize_database;

use crate::config::{DATABASE_BUSY_TIMEOUT_SECS, DATABASE_MAX_CONNECTIONS};
use crate::error::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;

/// Open the database at `db_path`, creating and migrating it as needed.
pub async fn create_pool(db_path: &Path) -> Result<SqlitePool> {
    tracing::info!("Opening database at {:?}", db_path);

    if let Some(parent) = db_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let options = connect_options(db_path);
    migrate(options.clone()).await?;

    let pool = SqlitePoolOptions::new()
        .max_connections(DATABASE_MAX_CONNECTIONS)
        .connect_with(options)
        .await?;

    tracing::debug!("Database pool ready ({} connections max)", DATABASE_MAX_CONNECTIONS);
    Ok(pool)
}

fn connect_options(db_path: &Path) -> SqliteConnectOptions {
    SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        // Snapshots are rewritten on every mutation; WAL keeps NORMAL crash safe
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(DATABASE_BUSY_TIMEOUT_SECS))
}

/// Schema changes run on a throwaway connection, closed before the shared
/// pool opens, so no pooled connection holds a pre-migration schema.
async fn migrate(options: SqliteConnectOptions) -> Result<()> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    let outcome = initialize_database(&pool).await;
    pool.close().await;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DATABASE_FILE;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_pool_in_missing_directory() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join(DATABASE_FILE);

        let pool = create_pool(&path).await.unwrap();

        assert!(path.exists());
        let mode: String = sqlx::query_scalar("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[tokio::test]
    async fn test_snapshots_survive_reopen() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(DATABASE_FILE);

        let pool = create_pool(&path).await.unwrap();
        Repository::new(pool.clone())
            .save_collection("habits", "[]")
            .await
            .unwrap();
        pool.close().await;

        let reopened = Repository::new(create_pool(&path).await.unwrap());
        assert_eq!(
            reopened.load_collection("habits").await.unwrap().as_deref(),
            Some("[]")
        );
    }
}
