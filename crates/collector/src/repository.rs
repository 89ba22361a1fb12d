//! Core repository metrics

use crate::client::GithubClient;
use crate::Result;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Core metrics for one repository
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepoMetrics {
    pub owner: String,
    pub name: String,
    pub full_name: String,
    pub stars: i64,
    pub forks: i64,
    pub open_issues: i64,
    pub open_prs: i64,
    pub language: Option<String>,
    pub topics: Vec<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OwnerResponse {
    pub login: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RepoResponse {
    owner: OwnerResponse,
    name: String,
    full_name: String,
    stargazers_count: i64,
    forks_count: i64,
    open_issues_count: i64,
    language: Option<String>,
    #[serde(default)]
    topics: Vec<String>,
    description: Option<String>,
}

impl From<RepoResponse> for RepoMetrics {
    fn from(repo: RepoResponse) -> Self {
        Self {
            owner: repo.owner.login,
            name: repo.name,
            full_name: repo.full_name,
            stars: repo.stargazers_count,
            forks: repo.forks_count,
            open_issues: repo.open_issues_count,
            open_prs: 0,
            language: repo.language,
            topics: repo.topics,
            description: repo.description,
        }
    }
}

impl GithubClient {
    /// Fetch core metrics for a repository
    pub async fn get_repository(
        &self,
        cancel: &CancellationToken,
        owner: &str,
        name: &str,
    ) -> Result<RepoMetrics> {
        let repo: RepoResponse = self
            .get_json(cancel, &format!("/repos/{}/{}", owner, name))
            .await?;
        Ok(repo.into())
    }

    /// Number of open pull requests
    pub async fn get_open_pr_count(
        &self,
        cancel: &CancellationToken,
        owner: &str,
        name: &str,
    ) -> Result<i64> {
        let count = self
            .count_items(cancel, &format!("/repos/{}/{}/pulls?state=open", owner, name))
            .await?;
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }

    /// Repository metrics with the open pull request count filled in.
    /// A failed count is logged and left at zero.
    pub async fn get_repository_with_prs(
        &self,
        cancel: &CancellationToken,
        owner: &str,
        name: &str,
    ) -> Result<RepoMetrics> {
        let mut metrics = self.get_repository(cancel, owner, name).await?;

        match self.get_open_pr_count(cancel, owner, name).await {
            Ok(count) => metrics.open_prs = count,
            Err(e) => {
                tracing::warn!(repo = %metrics.full_name, error = %e, "Failed to count open PRs")
            }
        }

        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_repository_payload() {
        let payload = serde_json::json!({
            "owner": { "login": "rust-lang" },
            "name": "rust",
            "full_name": "rust-lang/rust",
            "stargazers_count": 100_000,
            "forks_count": 12_000,
            "open_issues_count": 9_000,
            "language": "Rust",
            "topics": ["compiler", "language"],
            "description": null,
            "private": false
        });

        let repo: RepoResponse = serde_json::from_value(payload).unwrap();
        let metrics = RepoMetrics::from(repo);
        assert_eq!(metrics.owner, "rust-lang");
        assert_eq!(metrics.full_name, "rust-lang/rust");
        assert_eq!(metrics.stars, 100_000);
        assert_eq!(metrics.topics, vec!["compiler", "language"]);
        assert_eq!(metrics.description, None);
        assert_eq!(metrics.open_prs, 0);
    }

    #[test]
    fn topics_are_optional() {
        let payload = serde_json::json!({
            "owner": { "login": "a" },
            "name": "b",
            "full_name": "a/b",
            "stargazers_count": 1,
            "forks_count": 0,
            "open_issues_count": 0,
            "language": null,
            "description": "demo"
        });

        let repo: RepoResponse = serde_json::from_value(payload).unwrap();
        assert!(RepoMetrics::from(repo).topics.is_empty());
    }
}
