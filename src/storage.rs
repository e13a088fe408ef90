//! SQLite database holding password metadata and the protected tables.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

use crate::error::StoreError;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS password_metadata (
        label TEXT PRIMARY KEY NOT NULL,
        salt BLOB NOT NULL,
        canary BLOB NOT NULL,
        "primary" BOOLEAN NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS service_instance_details (
        id TEXT PRIMARY KEY NOT NULL,
        other_details BLOB
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS service_binding_credentials (
        id TEXT PRIMARY KEY NOT NULL,
        other_details BLOB
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS provision_request_details (
        id TEXT PRIMARY KEY NOT NULL,
        request_details TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS terraform_workspace (
        id TEXT PRIMARY KEY NOT NULL,
        workspace BLOB
    )
    "#,
];

/// Handle to the broker database.
///
/// Cloning shares the underlying connection pool.
#[derive(Clone, Debug)]
pub struct Database {
    pool: SqlitePool,
    path: Option<PathBuf>,
}

impl Database {
    /// Opens (creating if missing) the database file and bootstraps the schema.
    ///
    /// Creates parent directories if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or SQLite
    /// refuses the file.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .create_if_missing(true);

        let pool = SqlitePool::connect_with(options).await?;
        let db = Self {
            pool,
            path: Some(path.to_path_buf()),
        };
        db.bootstrap().await?;

        tracing::debug!(path = %path.display(), "database opened");
        Ok(db)
    }

    /// A private in-memory database. One connection only: every SQLite
    /// connection to `:memory:` sees its own empty database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(":memory:")?.create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let db = Self { pool, path: None };
        db.bootstrap().await?;
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// File backing the database; `None` when in memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn bootstrap(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}
