//! Recent-activity metrics: merged PRs, new issues, contributors, releases

use crate::client::{ensure_ok, GithubClient};
use crate::pagination::MAX_PAGES;
use crate::{ClientError, Result};
use chrono::{DateTime, TimeDelta, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio_util::sync::CancellationToken;

const ACTIVITY_WINDOW_DAYS: i64 = 7;

/// Activity over the last seven days
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityMetrics {
    pub merged_prs_7d: i64,
    /// Issues opened in the window, pull requests excluded
    pub new_issues_7d: i64,
    pub contributors: i64,
    pub latest_release: Option<ReleaseInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    pub tag_name: String,
    pub name: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    #[serde(rename(deserialize = "html_url"))]
    pub url: String,
}

#[derive(Debug, Deserialize)]
struct PullRequestResponse {
    merged_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct IssueResponse {
    created_at: DateTime<Utc>,
    /// Present only when the issue is actually a pull request
    pull_request: Option<serde_json::Value>,
}

/// Per-endpoint failures from [`GithubClient::get_activity_metrics`]
#[derive(Debug, Default)]
pub struct ActivityError {
    pub pr: Option<ClientError>,
    pub issue: Option<ClientError>,
    pub contributor: Option<ClientError>,
    pub release: Option<ClientError>,
}

impl ActivityError {
    pub fn has_errors(&self) -> bool {
        self.pr.is_some()
            || self.issue.is_some()
            || self.contributor.is_some()
            || self.release.is_some()
    }
}

impl fmt::Display for ActivityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = [
            ("PRs", &self.pr),
            ("issues", &self.issue),
            ("contributors", &self.contributor),
            ("releases", &self.release),
        ]
        .into_iter()
        .filter_map(|(label, err)| err.as_ref().map(|e| format!("{}: {}", label, e)))
        .collect();

        if parts.is_empty() {
            write!(f, "no errors")
        } else {
            write!(f, "partial activity errors: {}", parts.join("; "))
        }
    }
}

impl std::error::Error for ActivityError {}

fn window_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now - TimeDelta::days(ACTIVITY_WINDOW_DAYS)
}

impl GithubClient {
    /// Pull requests merged in the last seven days.
    ///
    /// Walks closed PRs sorted by last update, stopping at the first page
    /// without a qualifying merge or after the page cap.
    pub async fn get_merged_prs_count(
        &self,
        cancel: &CancellationToken,
        owner: &str,
        name: &str,
    ) -> Result<i64> {
        let since = window_start(Utc::now());
        let mut count = 0;

        for page in 1..=MAX_PAGES {
            let path = format!(
                "/repos/{}/{}/pulls?state=closed&sort=updated&direction=desc&per_page=100&page={}",
                owner, name, page
            );
            let prs: Vec<PullRequestResponse> = self.get_json(cancel, &path).await?;
            if prs.is_empty() {
                break;
            }

            let recent = prs
                .iter()
                .filter(|pr| pr.merged_at.is_some_and(|merged| merged > since))
                .count() as i64;
            count += recent;

            if recent == 0 {
                break;
            }
        }

        Ok(count)
    }

    /// Issues opened in the last seven days, excluding pull requests
    pub async fn get_recent_issues_count(
        &self,
        cancel: &CancellationToken,
        owner: &str,
        name: &str,
    ) -> Result<i64> {
        let since = window_start(Utc::now());
        let path = format!(
            "/repos/{}/{}/issues?state=all&since={}&per_page=100",
            owner,
            name,
            since.format("%Y-%m-%dT%H:%M:%SZ")
        );

        let issues: Vec<IssueResponse> = self.get_json(cancel, &path).await?;
        let count = issues
            .iter()
            .filter(|issue| issue.pull_request.is_none() && issue.created_at > since)
            .count();

        Ok(count as i64)
    }

    /// Total contributor count
    pub async fn get_contributor_count(
        &self,
        cancel: &CancellationToken,
        owner: &str,
        name: &str,
    ) -> Result<i64> {
        let count = self
            .count_items(cancel, &format!("/repos/{}/{}/contributors?anon=false", owner, name))
            .await?;
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }

    /// Latest published release; `None` when the repository has none
    pub async fn get_latest_release(
        &self,
        cancel: &CancellationToken,
        owner: &str,
        name: &str,
    ) -> Result<Option<ReleaseInfo>> {
        let path = format!("/repos/{}/{}/releases/latest", owner, name);
        let response = self.get(cancel, &path).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let body = ensure_ok(response).await?.bytes().await?;
        Ok(Some(serde_json::from_slice(&body)?))
    }

    /// Collect every activity metric, keeping whatever succeeded.
    ///
    /// A failed sub-fetch leaves its field at zero (or `None`) and is
    /// recorded in the returned [`ActivityError`].
    pub async fn get_activity_metrics(
        &self,
        cancel: &CancellationToken,
        owner: &str,
        name: &str,
    ) -> (ActivityMetrics, ActivityError) {
        let mut metrics = ActivityMetrics::default();
        let mut errors = ActivityError::default();

        match self.get_merged_prs_count(cancel, owner, name).await {
            Ok(count) => metrics.merged_prs_7d = count,
            Err(e) => errors.pr = Some(e),
        }

        match self.get_recent_issues_count(cancel, owner, name).await {
            Ok(count) => metrics.new_issues_7d = count,
            Err(e) => errors.issue = Some(e),
        }

        match self.get_contributor_count(cancel, owner, name).await {
            Ok(count) => metrics.contributors = count,
            Err(e) => errors.contributor = Some(e),
        }

        match self.get_latest_release(cancel, owner, name).await {
            Ok(release) => metrics.latest_release = release,
            Err(e) => errors.release = Some(e),
        }

        (metrics, errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activity_error_display() {
        assert_eq!(ActivityError::default().to_string(), "no errors");
        assert!(!ActivityError::default().has_errors());

        let err = ActivityError {
            contributor: Some(ClientError::Status(500)),
            ..Default::default()
        };
        assert!(err.has_errors());
        assert_eq!(err.to_string(), "partial activity errors: contributors: HTTP 500");
    }

    #[test]
    fn issue_payload_flags_pull_requests() {
        let payload = serde_json::json!([
            { "number": 1, "created_at": "2026-10-18T10:00:00Z" },
            { "number": 2, "created_at": "2026-10-18T11:00:00Z", "pull_request": { "url": "x" } }
        ]);
        let issues: Vec<IssueResponse> = serde_json::from_value(payload).unwrap();
        assert!(issues[0].pull_request.is_none());
        assert!(issues[1].pull_request.is_some());
    }

    #[test]
    fn release_payload_decodes() {
        let payload = serde_json::json!({
            "tag_name": "v1.2.0",
            "name": "1.2.0",
            "published_at": "2026-10-01T12:00:00Z",
            "html_url": "https://github.com/a/b/releases/tag/v1.2.0",
            "draft": false
        });
        let release: ReleaseInfo = serde_json::from_value(payload).unwrap();
        assert_eq!(release.tag_name, "v1.2.0");
        assert_eq!(release.url, "https://github.com/a/b/releases/tag/v1.2.0");
    }
}
