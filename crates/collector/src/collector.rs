//! Per-repository collection with partial-failure tolerance

use crate::activity::{ActivityError, ActivityMetrics};
use crate::client::GithubClient;
use crate::conditional::{Conditional, ConditionalInfo};
use crate::repo::RepoId;
use crate::repository::RepoMetrics;
use crate::ClientError;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Failure class of a primary repository fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoErrorKind {
    NotFound,
    RateLimited,
    Permanent,
    Transient,
}

impl RepoErrorKind {
    /// Classify a client error. Cancellation counts as transient.
    pub fn classify(err: &ClientError) -> Self {
        if err.is_not_found() {
            Self::NotFound
        } else if err.is_rate_limit() {
            Self::RateLimited
        } else if err.is_permanent() {
            Self::Permanent
        } else {
            Self::Transient
        }
    }
}

impl fmt::Display for RepoErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NotFound => "repository not found (may be deleted or renamed)",
            Self::RateLimited => "rate limit exceeded",
            Self::Permanent => "permanent error (will not retry)",
            Self::Transient => "transient error",
        };
        f.write_str(text)
    }
}

/// A primary-fetch failure with repository context
#[derive(Error, Debug)]
#[error("{repo}: {kind}: {source}")]
pub struct RepoError {
    pub repo: String,
    pub kind: RepoErrorKind,
    pub source: ClientError,
}

impl RepoError {
    pub fn new(repo: &RepoId, source: ClientError) -> Self {
        Self {
            repo: repo.full_name(),
            kind: RepoErrorKind::classify(&source),
            source,
        }
    }
}

/// Which optional sub-fetches to run after the primary fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectorOptions {
    pub collect_prs: bool,
    pub collect_activity: bool,
}

impl Default for CollectorOptions {
    fn default() -> Self {
        Self {
            collect_prs: true,
            collect_activity: true,
        }
    }
}

/// Outcome of collecting one repository
#[derive(Debug)]
pub struct CollectionResult {
    pub repo: RepoId,
    pub metrics: Option<RepoMetrics>,
    pub activity: Option<ActivityMetrics>,
    /// Sub-fetches that failed while the rest succeeded
    pub activity_error: Option<ActivityError>,
    pub collected_at: DateTime<Utc>,
    pub error: Option<RepoError>,
    /// Unchanged since the supplied validators (304)
    pub skipped: bool,
    /// Validators to send next time
    pub conditional: Option<ConditionalInfo>,
}

impl CollectionResult {
    fn new(repo: &RepoId) -> Self {
        Self {
            repo: repo.clone(),
            metrics: None,
            activity: None,
            activity_error: None,
            collected_at: Utc::now(),
            error: None,
            skipped: false,
            conditional: None,
        }
    }

    fn failed(repo: &RepoId, source: ClientError) -> Self {
        let mut result = Self::new(repo);
        result.error = Some(RepoError::new(repo, source));
        result
    }

    pub fn full_name(&self) -> String {
        self.repo.full_name()
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && !self.skipped
    }
}

/// Summary of [`RepoCollector::collect_all`]
#[derive(Debug)]
pub struct CollectionSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub results: Vec<CollectionResult>,
    pub failed_repos: Vec<String>,
}

impl CollectionSummary {
    fn record(&mut self, result: CollectionResult) {
        if result.error.is_some() {
            self.failed += 1;
            self.failed_repos.push(result.full_name());
        } else if result.skipped {
            self.skipped += 1;
        } else {
            self.successful += 1;
        }
        self.results.push(result);
    }
}

/// Aggregates several GitHub endpoints into one record per repository
#[derive(Debug, Clone)]
pub struct RepoCollector {
    client: Arc<GithubClient>,
    options: CollectorOptions,
}

impl RepoCollector {
    pub fn new(client: Arc<GithubClient>) -> Self {
        Self::with_options(client, CollectorOptions::default())
    }

    pub fn with_options(client: Arc<GithubClient>, options: CollectorOptions) -> Self {
        Self { client, options }
    }

    pub fn options(&self) -> CollectorOptions {
        self.options
    }

    /// Collect every metric for one repository
    pub async fn collect_repo(
        &self,
        cancel: &CancellationToken,
        repo: &RepoId,
    ) -> CollectionResult {
        debug!(repo = %repo, "Collecting repository");

        match self.client.get_repository(cancel, &repo.owner, &repo.name).await {
            Ok(metrics) => {
                let mut result = CollectionResult::new(repo);
                self.collect_details(cancel, repo, metrics, &mut result).await;
                result
            }
            Err(e) => self.fail(repo, e),
        }
    }

    /// Collect one repository, short-circuiting when it is unchanged since
    /// `validators`
    pub async fn collect_repo_conditional(
        &self,
        cancel: &CancellationToken,
        repo: &RepoId,
        validators: Option<&ConditionalInfo>,
    ) -> CollectionResult {
        debug!(repo = %repo, conditional = validators.is_some(), "Collecting repository");

        let fetched = self
            .client
            .get_repository_conditional(cancel, &repo.owner, &repo.name, validators)
            .await;

        let mut result = CollectionResult::new(repo);
        match fetched {
            Ok(Conditional::NotModified(info)) => {
                result.skipped = true;
                result.conditional = Some(info);
            }
            Ok(Conditional::Modified(metrics, info)) => {
                result.conditional = Some(info);
                self.collect_details(cancel, repo, metrics, &mut result).await;
            }
            Err(e) => return self.fail(repo, e),
        }
        result
    }

    /// Collect a batch sequentially. Once `cancel` fires, every repository
    /// not yet started is recorded as failed.
    pub async fn collect_all(
        &self,
        cancel: &CancellationToken,
        repos: &[RepoId],
    ) -> CollectionSummary {
        let mut summary = CollectionSummary {
            started_at: Utc::now(),
            finished_at: Utc::now(),
            total: repos.len(),
            successful: 0,
            failed: 0,
            skipped: 0,
            results: Vec::with_capacity(repos.len()),
            failed_repos: Vec::new(),
        };

        for (index, repo) in repos.iter().enumerate() {
            if cancel.is_cancelled() {
                warn!(remaining = repos.len() - index, "Collection cancelled");
                for remaining in &repos[index..] {
                    summary.record(CollectionResult::failed(remaining, ClientError::Cancelled));
                }
                break;
            }

            let result = self.collect_repo(cancel, repo).await;
            summary.record(result);
        }

        summary.finished_at = Utc::now();
        info!(
            total = summary.total,
            successful = summary.successful,
            failed = summary.failed,
            skipped = summary.skipped,
            "Collection complete"
        );
        summary
    }

    async fn collect_details(
        &self,
        cancel: &CancellationToken,
        repo: &RepoId,
        mut metrics: RepoMetrics,
        result: &mut CollectionResult,
    ) {
        if self.options.collect_prs {
            match self.client.get_open_pr_count(cancel, &repo.owner, &repo.name).await {
                Ok(count) => metrics.open_prs = count,
                Err(e) => warn!(repo = %repo, error = %e, "Failed to count open PRs"),
            }
        }
        result.metrics = Some(metrics);

        if self.options.collect_activity {
            let (activity, errors) = self
                .client
                .get_activity_metrics(cancel, &repo.owner, &repo.name)
                .await;
            if errors.has_errors() {
                warn!(repo = %repo, error = %errors, "Partial activity collection");
                result.activity_error = Some(errors);
            }
            result.activity = Some(activity);
        }
    }

    fn fail(&self, repo: &RepoId, source: ClientError) -> CollectionResult {
        let result = CollectionResult::failed(repo, source);
        if let Some(err) = &result.error {
            warn!(
                repo = %repo,
                kind = ?err.kind,
                error = %err.source,
                "Repository collection failed"
            );
        }
        result
    }
}
