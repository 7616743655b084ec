//! Database connection management
//!
//! Provides the SQLite connection pool, migrations and health checks.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::db::error::DbResult;

/// Type alias for the database connection pool
pub type DatabasePool = SqlitePool;

/// Database connection wrapper
#[derive(Clone, Debug)]
pub struct DatabaseConnection {
    pool: Arc<DatabasePool>,
}

impl DatabaseConnection {
    /// Connect with a custom pool size
    ///
    /// In-memory databases are private to one connection, so their pool is
    /// always pinned to a single connection.
    pub async fn with_max_connections(database_url: &str, max_connections: u32) -> DbResult<Self> {
        let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");

        let mut options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { max_connections.max(1) })
            .connect_with(options)
            .await?;

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Connect and bring the schema up to date
    pub async fn open(database_url: &str, max_connections: u32) -> DbResult<Self> {
        let db = Self::with_max_connections(database_url, max_connections).await?;
        db.run_migrations().await?;
        Ok(db)
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    /// Run migrations on the database
    pub async fn run_migrations(&self) -> DbResult<()> {
        sqlx::migrate!("./migrations").run(self.pool.as_ref()).await?;
        Ok(())
    }

    /// Perform a health check by running a simple query
    pub async fn health_check(&self) -> DbResult<()> {
        sqlx::query("SELECT 1").fetch_one(self.pool.as_ref()).await?;
        Ok(())
    }

    /// Close the connection pool gracefully
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_database_migrates() {
        let db = DatabaseConnection::open("sqlite::memory:", 5).await.unwrap();
        assert!(db.health_check().await.is_ok());

        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE 'task%' ORDER BY name")
                .fetch_all(db.pool())
                .await
                .unwrap();
        let names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        assert_eq!(names, vec!["task_steps", "task_transitions", "tasks"]);
    }

    #[tokio::test]
    async fn test_memory_pool_is_single_connection() {
        let db = DatabaseConnection::with_max_connections("sqlite::memory:", 8).await.unwrap();
        db.health_check().await.unwrap();
        assert_eq!(db.pool().size(), 1);
    }

    #[tokio::test]
    async fn test_file_database_created() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("tasks.db").display());
        let db = DatabaseConnection::open(&url, 4).await.unwrap();
        assert!(db.health_check().await.is_ok());
        db.close().await;
        assert!(dir.path().join("tasks.db").exists());
    }
}
