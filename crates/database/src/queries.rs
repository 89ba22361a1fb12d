//! Database query functions

use crate::models::{RepoState, TrackedRepo, DEFAULT_CATEGORY};
use crate::schema::Database;
use crate::{DatabaseError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::{BTreeSet, HashMap};

const REPO_STATE_COLUMNS: &str = "owner, name, stars, stars_prev, forks, open_issues, open_prs,
     contributors, contributors_prev, merged_prs_7d, new_issues_7d, language,
     star_velocity, star_acceleration, pr_velocity, issue_velocity, contributor_growth,
     growth_score, normalized_growth_score, etag, last_modified, last_collected";

const LAST_SCAN_KEY: &str = "last_scan";

#[derive(sqlx::FromRow)]
struct RepoStateRow {
    full_name: String,
    #[sqlx(flatten)]
    state: RepoState,
}

#[derive(sqlx::FromRow)]
struct TrackedRow {
    full_name: String,
    owner: String,
    name: String,
    added_at: DateTime<Utc>,
}

impl Database {
    // ==================== Repository State ====================

    /// Get the state for a repository by full name
    pub async fn fetch_repo_state(&self, full_name: &str) -> Result<Option<RepoState>> {
        let row = sqlx::query_as::<_, RepoState>(&format!(
            "SELECT {REPO_STATE_COLUMNS} FROM repo_states WHERE full_name = ?"
        ))
        .bind(full_name)
        .fetch_optional(self.pool())
        .await?;

        Ok(row)
    }

    /// Insert or replace the state for a repository in a single statement
    pub async fn upsert_repo_state(&self, full_name: &str, state: &RepoState) -> Result<()> {
        sqlx::query(
            "INSERT INTO repo_states
             (full_name, owner, name, stars, stars_prev, forks, open_issues, open_prs,
              contributors, contributors_prev, merged_prs_7d, new_issues_7d, language,
              star_velocity, star_acceleration, pr_velocity, issue_velocity, contributor_growth,
              growth_score, normalized_growth_score, etag, last_modified, last_collected,
              updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?,
                     strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
             ON CONFLICT(full_name) DO UPDATE SET
                owner = excluded.owner,
                name = excluded.name,
                stars = excluded.stars,
                stars_prev = excluded.stars_prev,
                forks = excluded.forks,
                open_issues = excluded.open_issues,
                open_prs = excluded.open_prs,
                contributors = excluded.contributors,
                contributors_prev = excluded.contributors_prev,
                merged_prs_7d = excluded.merged_prs_7d,
                new_issues_7d = excluded.new_issues_7d,
                language = excluded.language,
                star_velocity = excluded.star_velocity,
                star_acceleration = excluded.star_acceleration,
                pr_velocity = excluded.pr_velocity,
                issue_velocity = excluded.issue_velocity,
                contributor_growth = excluded.contributor_growth,
                growth_score = excluded.growth_score,
                normalized_growth_score = excluded.normalized_growth_score,
                etag = excluded.etag,
                last_modified = excluded.last_modified,
                last_collected = excluded.last_collected,
                updated_at = excluded.updated_at",
        )
        .bind(full_name)
        .bind(&state.owner)
        .bind(&state.name)
        .bind(state.stars)
        .bind(state.stars_prev)
        .bind(state.forks)
        .bind(state.open_issues)
        .bind(state.open_prs)
        .bind(state.contributors)
        .bind(state.contributors_prev)
        .bind(state.merged_prs_7d)
        .bind(state.new_issues_7d)
        .bind(&state.language)
        .bind(state.star_velocity)
        .bind(state.star_acceleration)
        .bind(state.pr_velocity)
        .bind(state.issue_velocity)
        .bind(state.contributor_growth)
        .bind(state.growth_score)
        .bind(state.normalized_growth_score)
        .bind(&state.etag)
        .bind(&state.last_modified)
        .bind(state.last_collected)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Delete a repository's state
    pub async fn remove_repo_state(&self, full_name: &str) -> Result<()> {
        let affected = sqlx::query("DELETE FROM repo_states WHERE full_name = ?")
            .bind(full_name)
            .execute(self.pool())
            .await?
            .rows_affected();

        if affected == 0 {
            return Err(DatabaseError::NotFound(format!("Repository: {}", full_name)));
        }
        Ok(())
    }

    /// Get all repository states, keyed by full name
    pub async fn list_repo_states(&self) -> Result<Vec<(String, RepoState)>> {
        let rows = sqlx::query_as::<_, RepoStateRow>(&format!(
            "SELECT full_name, {REPO_STATE_COLUMNS} FROM repo_states ORDER BY full_name"
        ))
        .fetch_all(self.pool())
        .await?;

        Ok(rows.into_iter().map(|row| (row.full_name, row.state)).collect())
    }

    /// Count tracked repositories
    pub async fn count_repo_states(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM repo_states")
            .fetch_one(self.pool())
            .await?;

        Ok(count)
    }

    // ==================== Tracked Repositories ====================

    /// Track a repository under `key` (its lowercased `owner/name`).
    ///
    /// Tracking an already tracked repository merges the new categories into
    /// the existing ones. With no categories the repository lands in
    /// [`DEFAULT_CATEGORY`].
    pub async fn track_repo(
        &self,
        key: &str,
        owner: &str,
        name: &str,
        categories: &[String],
    ) -> Result<TrackedRepo> {
        let mut categories: BTreeSet<&str> =
            categories.iter().map(|c| c.trim()).filter(|c| !c.is_empty()).collect();
        if categories.is_empty() {
            categories.insert(DEFAULT_CATEGORY);
        }

        let mut tx = self.pool().begin().await?;

        sqlx::query(
            "INSERT INTO tracked_repos (full_name, owner, name, added_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(full_name) DO NOTHING",
        )
        .bind(key)
        .bind(owner)
        .bind(name)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        for category in &categories {
            sqlx::query(
                "INSERT INTO tracked_categories (full_name, category) VALUES (?, ?)
                 ON CONFLICT(full_name, category) DO NOTHING",
            )
            .bind(key)
            .bind(*category)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        self.fetch_tracked_repo(key)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Tracked repository: {key}")))
    }

    /// Get one tracked repository with its categories
    pub async fn fetch_tracked_repo(&self, key: &str) -> Result<Option<TrackedRepo>> {
        let row = sqlx::query_as::<_, TrackedRow>(
            "SELECT full_name, owner, name, added_at FROM tracked_repos WHERE full_name = ?",
        )
        .bind(key)
        .fetch_optional(self.pool())
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let categories: Vec<(String,)> = sqlx::query_as(
            "SELECT category FROM tracked_categories WHERE full_name = ? ORDER BY category",
        )
        .bind(key)
        .fetch_all(self.pool())
        .await?;

        Ok(Some(TrackedRepo {
            owner: row.owner,
            name: row.name,
            categories: categories.into_iter().map(|(c,)| c).collect(),
            added_at: row.added_at,
        }))
    }

    /// Stop tracking a repository. Returns whether it was tracked.
    pub async fn untrack_repo(&self, key: &str) -> Result<bool> {
        let mut tx = self.pool().begin().await?;

        sqlx::query("DELETE FROM tracked_categories WHERE full_name = ?")
            .bind(key)
            .execute(&mut *tx)
            .await?;
        let affected = sqlx::query("DELETE FROM tracked_repos WHERE full_name = ?")
            .bind(key)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(affected > 0)
    }

    /// Tracked repositories in the order they were added, optionally only
    /// those in `category`
    pub async fn list_tracked_repos(&self, category: Option<&str>) -> Result<Vec<TrackedRepo>> {
        let rows = match category {
            Some(category) => {
                sqlx::query_as::<_, TrackedRow>(
                    "SELECT r.full_name, r.owner, r.name, r.added_at
                     FROM tracked_repos r
                     JOIN tracked_categories c ON c.full_name = r.full_name
                     WHERE c.category = ?
                     ORDER BY r.added_at, r.full_name",
                )
                .bind(category)
                .fetch_all(self.pool())
                .await?
            }
            None => {
                sqlx::query_as::<_, TrackedRow>(
                    "SELECT full_name, owner, name, added_at FROM tracked_repos
                     ORDER BY added_at, full_name",
                )
                .fetch_all(self.pool())
                .await?
            }
        };

        let pairs: Vec<(String, String)> = sqlx::query_as(
            "SELECT full_name, category FROM tracked_categories ORDER BY full_name, category",
        )
        .fetch_all(self.pool())
        .await?;

        let mut categories: HashMap<String, Vec<String>> = HashMap::new();
        for (full_name, category) in pairs {
            categories.entry(full_name).or_default().push(category);
        }

        Ok(rows
            .into_iter()
            .map(|row| TrackedRepo {
                categories: categories.remove(&row.full_name).unwrap_or_default(),
                owner: row.owner,
                name: row.name,
                added_at: row.added_at,
            })
            .collect())
    }

    /// Every category in use, sorted
    pub async fn tracked_categories(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT category FROM tracked_categories ORDER BY category")
                .fetch_all(self.pool())
                .await?;

        Ok(rows.into_iter().map(|(c,)| c).collect())
    }

    // ==================== Scan Metadata ====================

    /// Get the time the last scan finished
    pub async fn fetch_last_scan(&self) -> Result<Option<DateTime<Utc>>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM scan_meta WHERE key = ?")
            .bind(LAST_SCAN_KEY)
            .fetch_optional(self.pool())
            .await?;

        row.map(|(value,)| {
            DateTime::parse_from_rfc3339(&value)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| DatabaseError::InvalidTimestamp(format!("{value}: {e}")))
        })
        .transpose()
    }

    /// Record the time the last scan finished
    pub async fn store_last_scan(&self, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "INSERT INTO scan_meta (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(LAST_SCAN_KEY)
        .bind(at.to_rfc3339_opts(SecondsFormat::Nanos, true))
        .execute(self.pool())
        .await?;

        Ok(())
    }
}
