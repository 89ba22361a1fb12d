//! Database schema and connection management

use crate::{DatabaseError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// SQLite-backed state store
#[derive(Clone, Debug)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connect to an existing database or create a new one
    pub async fn connect(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                DatabaseError::Migration(format!("creating {}: {e}", parent.display()))
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.display());

        let options = SqliteConnectOptions::from_str(&url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;

        info!("Database connected: {}", path.display());
        Ok(db)
    }

    /// Connect to an in-memory database (for testing)
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;

        info!("In-memory database initialized");
        Ok(db)
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;

        Ok(())
    }
}

const SCHEMA: &str = r#"
-- Per-repository state, one row per tracked repository
CREATE TABLE IF NOT EXISTS repo_states (
    full_name TEXT PRIMARY KEY,
    owner TEXT NOT NULL,
    name TEXT NOT NULL,
    stars INTEGER NOT NULL DEFAULT 0,
    stars_prev INTEGER NOT NULL DEFAULT 0,
    forks INTEGER NOT NULL DEFAULT 0,
    open_issues INTEGER NOT NULL DEFAULT 0,
    open_prs INTEGER NOT NULL DEFAULT 0,
    contributors INTEGER NOT NULL DEFAULT 0,
    contributors_prev INTEGER NOT NULL DEFAULT 0,
    merged_prs_7d INTEGER NOT NULL DEFAULT 0,
    new_issues_7d INTEGER NOT NULL DEFAULT 0,
    language TEXT,
    star_velocity REAL NOT NULL DEFAULT 0,
    star_acceleration REAL NOT NULL DEFAULT 0,
    pr_velocity REAL NOT NULL DEFAULT 0,
    issue_velocity REAL NOT NULL DEFAULT 0,
    contributor_growth REAL NOT NULL DEFAULT 0,
    growth_score REAL NOT NULL DEFAULT 0,
    normalized_growth_score REAL NOT NULL DEFAULT 0,
    etag TEXT,
    last_modified TEXT,
    last_collected TEXT,
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE INDEX IF NOT EXISTS idx_repo_states_normalized
    ON repo_states(normalized_growth_score DESC);

-- Repositories scanned by default, keyed by lowercased owner/name
CREATE TABLE IF NOT EXISTS tracked_repos (
    full_name TEXT PRIMARY KEY,
    owner TEXT NOT NULL,
    name TEXT NOT NULL,
    added_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tracked_categories (
    full_name TEXT NOT NULL REFERENCES tracked_repos(full_name) ON DELETE CASCADE,
    category TEXT NOT NULL,
    PRIMARY KEY (full_name, category)
);

CREATE INDEX IF NOT EXISTS idx_tracked_categories_category
    ON tracked_categories(category);

-- Scan bookkeeping (last scan time)
CREATE TABLE IF NOT EXISTS scan_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;
