//! Batch scanning: collect, derive velocities, score and persist

use crate::client::GithubClient;
use crate::collector::{CollectionResult, CollectorOptions, RepoCollector, RepoError};
use crate::conditional::ConditionalInfo;
use crate::repo::{dedup_repos, RepoId};
use chrono::{DateTime, Utc};
use repovitals_analyzer::{
    normalize_scores, normalize_scores_percentile, top_n, AnalyzerError, Calculator, ScoreInput,
    ScoredRepo, VelocityMetrics, Weights,
};
use repovitals_database::{DatabaseError, RepoState, StateStore};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("A scan is already running")]
    AlreadyRunning,

    #[error("Scan cancelled after {} of {} repositories", .summary.processed(), .summary.total)]
    Cancelled { summary: Box<ScanSummary> },

    #[error("State store error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Invalid scoring weights: {0}")]
    InvalidWeights(#[from] AnalyzerError),
}

pub type Result<T> = std::result::Result<T, ScanError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStatus {
    Running,
    Completed,
    Cancelled,
}

/// How raw scores are mapped onto 0-100
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Normalization {
    #[default]
    MinMax,
    Percentile,
}

#[derive(Error, Debug)]
pub enum FailureReason {
    #[error(transparent)]
    Collection(RepoError),

    #[error("failed to persist state: {0}")]
    Store(DatabaseError),

    #[error("scan cancelled before this repository was finished")]
    Cancelled,
}

#[derive(Debug)]
pub struct ScanFailure {
    pub repo: String,
    pub reason: FailureReason,
}

/// Outcome of one scan. `total == successful + failed + skipped`.
#[derive(Debug)]
pub struct ScanSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: ScanStatus,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Repositories whose state was rewritten
    pub updated: usize,
    pub failures: Vec<ScanFailure>,
    pub skipped_repos: Vec<String>,
}

impl ScanSummary {
    fn new(total: usize) -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            status: ScanStatus::Running,
            total,
            successful: 0,
            failed: 0,
            skipped: 0,
            updated: 0,
            failures: Vec::new(),
            skipped_repos: Vec::new(),
        }
    }

    /// Repositories with a final outcome
    pub fn processed(&self) -> usize {
        self.successful + self.failed + self.skipped
    }

    pub fn failed_repos(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.repo.as_str()).collect()
    }

    pub fn duration(&self) -> chrono::TimeDelta {
        self.finished_at.unwrap_or_else(Utc::now) - self.started_at
    }

    fn has_cancellations(&self) -> bool {
        self.failures
            .iter()
            .any(|f| matches!(f.reason, FailureReason::Cancelled))
    }

    fn record_failure(&mut self, repo: String, reason: FailureReason) {
        self.failed += 1;
        self.failures.push(ScanFailure { repo, reason });
    }
}

/// Drives collection for a batch of repositories and keeps the state store
/// and scores current
pub struct Scanner {
    client: Arc<GithubClient>,
    collector: RepoCollector,
    store: Arc<dyn StateStore>,
    calculator: RwLock<Calculator>,
    scan_lock: Mutex<()>,
}

impl Scanner {
    pub fn new(client: Arc<GithubClient>, store: Arc<dyn StateStore>) -> Self {
        Self::with_options(client, store, CollectorOptions::default())
    }

    pub fn with_options(
        client: Arc<GithubClient>,
        store: Arc<dyn StateStore>,
        options: CollectorOptions,
    ) -> Self {
        Self {
            collector: RepoCollector::with_options(client.clone(), options),
            client,
            store,
            calculator: RwLock::new(Calculator::default()),
            scan_lock: Mutex::new(()),
        }
    }

    pub fn client(&self) -> &Arc<GithubClient> {
        &self.client
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub fn weights(&self) -> Weights {
        self.calculator().weights()
    }

    /// Replace the scoring weights used by later scans
    pub fn set_weights(&self, weights: Weights) -> Result<()> {
        weights.validate()?;
        *self.calculator.write().unwrap_or_else(PoisonError::into_inner) = Calculator::new(weights);
        Ok(())
    }

    fn calculator(&self) -> Calculator {
        *self.calculator.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Scan `repos` in order and refresh normalized scores.
    ///
    /// Repeated repositories (compared case-insensitively) are scanned once.
    /// Only one scan runs at a time; a concurrent call fails with
    /// [`ScanError::AlreadyRunning`]. When `cancel` fires, the repository in
    /// flight and those not yet started are recorded as cancelled and the
    /// partial summary is returned inside [`ScanError::Cancelled`].
    pub async fn scan(&self, cancel: &CancellationToken, repos: &[RepoId]) -> Result<ScanSummary> {
        let _guard = self.scan_lock.try_lock().map_err(|_| ScanError::AlreadyRunning)?;

        let repos = dedup_repos(repos.to_vec());
        let mut summary = ScanSummary::new(repos.len());
        info!(repo_count = repos.len(), "Starting scan");

        for (index, repo) in repos.iter().enumerate() {
            if cancel.is_cancelled() {
                warn!(
                    processed = summary.processed(),
                    remaining = repos.len() - index,
                    "Scan cancelled"
                );
                for remaining in &repos[index..] {
                    summary.record_failure(remaining.full_name(), FailureReason::Cancelled);
                }
                summary.status = ScanStatus::Cancelled;
                break;
            }

            self.scan_repo(cancel, repo, &mut summary).await;
        }

        // The last repository may have been cut off mid-fetch
        if summary.status == ScanStatus::Running && summary.has_cancellations() {
            summary.status = ScanStatus::Cancelled;
        }

        if summary.status == ScanStatus::Running {
            summary.status = ScanStatus::Completed;
            if let Err(e) = self.store.set_last_scan(Utc::now()).await {
                error!(error = %e, "Failed to record scan time");
            }
        }

        if let Err(e) = self.normalize_all_scores().await {
            error!(error = %e, "Failed to normalize scores");
        }

        summary.finished_at = Some(Utc::now());
        info!(
            status = ?summary.status,
            total = summary.total,
            successful = summary.successful,
            failed = summary.failed,
            skipped = summary.skipped,
            updated = summary.updated,
            duration_ms = summary.duration().num_milliseconds(),
            "Scan finished"
        );

        match summary.status {
            ScanStatus::Cancelled => Err(ScanError::Cancelled {
                summary: Box::new(summary),
            }),
            _ => Ok(summary),
        }
    }

    async fn scan_repo(
        &self,
        cancel: &CancellationToken,
        repo: &RepoId,
        summary: &mut ScanSummary,
    ) {
        let full_name = repo.full_name();
        let key = repo.key();

        let prev = match self.store.get_repo_state(&key).await {
            Ok(prev) => prev,
            Err(e) => {
                warn!(repo = %full_name, error = %e, "Failed to read previous state");
                summary.record_failure(full_name, FailureReason::Store(e));
                return;
            }
        };

        let validators = prev
            .as_ref()
            .map(|state| ConditionalInfo::new(state.etag.clone(), state.last_modified.clone()))
            .filter(|info| !info.is_empty());

        let mut result = self
            .collector
            .collect_repo_conditional(cancel, repo, validators.as_ref())
            .await;

        if let Some(err) = result.error.take() {
            let reason = if err.source.is_cancelled() {
                FailureReason::Cancelled
            } else {
                FailureReason::Collection(err)
            };
            summary.record_failure(full_name, reason);
            return;
        }

        if result.skipped {
            debug!(repo = %full_name, "Repository unchanged (304)");
            if let Some(prev) = prev {
                match self.refresh_validators(&key, prev, result.conditional.as_ref()).await {
                    Ok(true) => summary.updated += 1,
                    Ok(false) => {}
                    Err(e) => {
                        error!(repo = %full_name, error = %e, "Failed to store validators");
                        summary.record_failure(full_name, FailureReason::Store(e));
                        return;
                    }
                }
            }
            summary.skipped += 1;
            summary.skipped_repos.push(full_name);
            return;
        }

        let state = self.next_state(repo, &result, prev.as_ref());
        debug!(
            repo = %full_name,
            stars = state.stars,
            star_velocity = state.star_velocity,
            growth_score = state.growth_score,
            "Repository scored"
        );

        match self.store.set_repo_state(&key, state).await {
            Ok(()) => {
                summary.successful += 1;
                summary.updated += 1;
            }
            Err(e) => {
                error!(repo = %full_name, error = %e, "Failed to persist state");
                summary.record_failure(full_name, FailureReason::Store(e));
            }
        }
    }

    /// Keep counters from the previous state, store validators from a 304.
    /// Returns whether the state was rewritten.
    async fn refresh_validators(
        &self,
        key: &str,
        mut state: RepoState,
        info: Option<&ConditionalInfo>,
    ) -> std::result::Result<bool, DatabaseError> {
        let Some(info) = info.filter(|info| !info.is_empty()) else {
            return Ok(false);
        };

        let mut changed = false;
        if info.etag.is_some() && info.etag != state.etag {
            state.etag = info.etag.clone();
            changed = true;
        }
        if info.last_modified.is_some() && info.last_modified != state.last_modified {
            state.last_modified = info.last_modified.clone();
            changed = true;
        }

        if changed {
            self.store.set_repo_state(key, state).await?;
        }
        Ok(changed)
    }

    /// Build the state to persist after a successful collection
    fn next_state(
        &self,
        repo: &RepoId,
        result: &CollectionResult,
        prev: Option<&RepoState>,
    ) -> RepoState {
        let metrics = result.metrics.clone().unwrap_or_default();
        let activity = result.activity.clone().unwrap_or_default();
        let errors = result.activity_error.as_ref();
        let collected = result.activity.is_some();

        // A counter whose sub-fetch failed keeps its previous value
        let contributors = carried(
            activity.contributors,
            !collected || errors.is_some_and(|e| e.contributor.is_some()),
            prev.map(|s| s.contributors),
        );
        let merged_prs_7d = carried(
            activity.merged_prs_7d,
            !collected || errors.is_some_and(|e| e.pr.is_some()),
            prev.map(|s| s.merged_prs_7d),
        );
        let new_issues_7d = carried(
            activity.new_issues_7d,
            !collected || errors.is_some_and(|e| e.issue.is_some()),
            prev.map(|s| s.new_issues_7d),
        );

        let mut input = ScoreInput {
            stars: metrics.stars,
            forks: metrics.forks,
            contributors,
            merged_prs_7d,
            new_issues_7d,
            ..Default::default()
        };

        let mut state = RepoState {
            owner: repo.owner.clone(),
            name: repo.name.clone(),
            stars: metrics.stars,
            forks: metrics.forks,
            open_issues: metrics.open_issues,
            open_prs: metrics.open_prs,
            contributors,
            merged_prs_7d,
            new_issues_7d,
            language: metrics.language,
            last_collected: Some(result.collected_at),
            ..Default::default()
        };

        if let Some(info) = &result.conditional {
            state.etag = info.etag.clone();
            state.last_modified = info.last_modified.clone();
        }

        if let Some(prev) = prev {
            state.normalized_growth_score = prev.normalized_growth_score;

            if prev.last_collected.is_some() {
                input.stars_prev = prev.stars;
                input.contributors_prev = prev.contributors;
                input.days_elapsed = prev.days_since_collected(result.collected_at);
                input.prev_star_velocity = prev.star_velocity;

                state.stars_prev = prev.stars;
                state.contributors_prev = prev.contributors;
            }
        }

        let calculator = self.calculator();
        let velocities = calculator.velocities(&input);
        state.star_velocity = velocities.star_velocity;
        state.star_acceleration = velocities.star_acceleration;
        state.pr_velocity = velocities.pr_velocity;
        state.issue_velocity = velocities.issue_velocity;
        state.contributor_growth = velocities.contributor_growth;
        state.growth_score = calculator.raw_score(&velocities);

        state
    }

    /// Min-max normalize growth scores across every tracked repository.
    /// Running it twice without an intervening scan changes nothing.
    pub async fn normalize_all_scores(
        &self,
    ) -> std::result::Result<Vec<ScoredRepo>, DatabaseError> {
        normalize_store(self.store.as_ref(), Normalization::MinMax).await
    }

    pub async fn normalize_all_scores_with(
        &self,
        method: Normalization,
    ) -> std::result::Result<Vec<ScoredRepo>, DatabaseError> {
        normalize_store(self.store.as_ref(), method).await
    }

    /// The `n` highest repositories by normalized growth score
    pub async fn top_repos(&self, n: usize) -> std::result::Result<Vec<ScoredRepo>, DatabaseError> {
        top_from_store(self.store.as_ref(), n).await
    }
}

/// Rewrite the normalized score of every persisted state whose value moved
pub async fn normalize_store(
    store: &dyn StateStore,
    method: Normalization,
) -> std::result::Result<Vec<ScoredRepo>, DatabaseError> {
    let mut states = store.all_repo_states().await?;
    if states.is_empty() {
        return Ok(Vec::new());
    }

    let mut scored = scored_repos(&states);
    match method {
        Normalization::MinMax => normalize_scores(&mut scored),
        Normalization::Percentile => normalize_scores_percentile(&mut scored),
    }

    let mut changed = 0;
    for repo in &scored {
        let Some(mut state) = states.remove(&repo.full_name) else {
            continue;
        };
        if state.normalized_growth_score != repo.normalized_score {
            state.normalized_growth_score = repo.normalized_score;
            store.set_repo_state(&repo.full_name, state).await?;
            changed += 1;
        }
    }

    debug!(repos = scored.len(), changed, method = ?method, "Normalized growth scores");
    Ok(scored)
}

pub async fn top_from_store(
    store: &dyn StateStore,
    n: usize,
) -> std::result::Result<Vec<ScoredRepo>, DatabaseError> {
    let states = store.all_repo_states().await?;
    Ok(top_n(&scored_repos(&states), n))
}

fn carried(fresh: i64, missing: bool, previous: Option<i64>) -> i64 {
    match previous {
        Some(previous) if missing => previous,
        _ => fresh,
    }
}

/// Scored view of persisted states, ordered by name for stable ranking
fn scored_repos(states: &std::collections::HashMap<String, RepoState>) -> Vec<ScoredRepo> {
    let mut repos: Vec<ScoredRepo> = states
        .iter()
        .map(|(full_name, state)| ScoredRepo {
            full_name: full_name.clone(),
            velocities: VelocityMetrics {
                star_velocity: state.star_velocity,
                star_acceleration: state.star_acceleration,
                pr_velocity: state.pr_velocity,
                issue_velocity: state.issue_velocity,
                contributor_growth: state.contributor_growth,
            },
            raw_score: state.growth_score,
            normalized_score: state.normalized_growth_score,
        })
        .collect();
    repos.sort_by(|a, b| a.full_name.cmp(&b.full_name));
    repos
}
