//! The state accessor contract used by the scanner

use crate::models::RepoState;
use crate::schema::Database;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Persisted per-repository state, keyed by `owner/name`.
///
/// Implementations must be safe for concurrent callers. Writes are
/// last-writer-wins and must round-trip every [`RepoState`] field,
/// including validators as opaque strings and sub-second timestamps.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get_repo_state(&self, full_name: &str) -> Result<Option<RepoState>>;

    async fn set_repo_state(&self, full_name: &str, state: RepoState) -> Result<()>;

    /// Fails with `NotFound` when the repository is not tracked
    async fn delete_repo_state(&self, full_name: &str) -> Result<()>;

    /// Snapshot of every tracked repository
    async fn all_repo_states(&self) -> Result<HashMap<String, RepoState>>;

    async fn repo_count(&self) -> Result<usize>;

    async fn last_scan(&self) -> Result<Option<DateTime<Utc>>>;

    async fn set_last_scan(&self, at: DateTime<Utc>) -> Result<()>;
}

#[async_trait]
impl StateStore for Database {
    async fn get_repo_state(&self, full_name: &str) -> Result<Option<RepoState>> {
        self.fetch_repo_state(full_name).await
    }

    async fn set_repo_state(&self, full_name: &str, state: RepoState) -> Result<()> {
        self.upsert_repo_state(full_name, &state).await
    }

    async fn delete_repo_state(&self, full_name: &str) -> Result<()> {
        self.remove_repo_state(full_name).await
    }

    async fn all_repo_states(&self) -> Result<HashMap<String, RepoState>> {
        Ok(self.list_repo_states().await?.into_iter().collect())
    }

    async fn repo_count(&self) -> Result<usize> {
        Ok(usize::try_from(self.count_repo_states().await?).unwrap_or_default())
    }

    async fn last_scan(&self) -> Result<Option<DateTime<Utc>>> {
        self.fetch_last_scan().await
    }

    async fn set_last_scan(&self, at: DateTime<Utc>) -> Result<()> {
        self.store_last_scan(at).await
    }
}
