//! In-memory state store for tests and dry runs

use crate::models::RepoState;
use crate::store::StateStore;
use crate::{DatabaseError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

#[derive(Debug, Default)]
struct Inner {
    repos: HashMap<String, RepoState>,
    last_scan: Option<DateTime<Utc>>,
}

/// Non-durable [`StateStore`] backed by a `HashMap`
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with existing states
    pub fn with_states(states: impl IntoIterator<Item = (String, RepoState)>) -> Self {
        let store = Self::new();
        store
            .inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .repos
            .extend(states);
        store
    }
}

#[async_trait]
impl StateStore for InMemoryStore {
    async fn get_repo_state(&self, full_name: &str) -> Result<Option<RepoState>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(inner.repos.get(full_name).cloned())
    }

    async fn set_repo_state(&self, full_name: &str, state: RepoState) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.repos.insert(full_name.to_string(), state);
        Ok(())
    }

    async fn delete_repo_state(&self, full_name: &str) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner
            .repos
            .remove(full_name)
            .map(|_| ())
            .ok_or_else(|| DatabaseError::NotFound(format!("Repository: {}", full_name)))
    }

    async fn all_repo_states(&self) -> Result<HashMap<String, RepoState>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(inner.repos.clone())
    }

    async fn repo_count(&self) -> Result<usize> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(inner.repos.len())
    }

    async fn last_scan(&self) -> Result<Option<DateTime<Utc>>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(inner.last_scan)
    }

    async fn set_last_scan(&self, at: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.last_scan = Some(at);
        Ok(())
    }
}
