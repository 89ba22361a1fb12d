//! RepoVitals CLI
//!
//! Scans GitHub repositories, keeps their growth state and prints rankings.

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use repovitals_analyzer::Weights;
use repovitals_collector::{
    dedup_repos, filter_excluded, normalize_store, top_from_store, ClientConfig, CollectorOptions,
    ExclusionPattern, GithubClient, Normalization, RateLimitOptions, RepoId, RetryConfig,
    ScanError, ScanSummary, Scanner,
};
use repovitals_database::{Database, DatabaseError, StateStore, TrackedRepo};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "rv")]
#[command(about = "RepoVitals - GitHub repository growth tracker")]
#[command(version)]
struct Cli {
    /// Database file path
    #[arg(short, long, global = true, default_value = "repovitals.db")]
    database: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON logs and command output
    #[arg(long, global = true)]
    json: bool,

    #[command(flatten)]
    github: GithubArgs,

    #[command(flatten)]
    weights: WeightArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GithubArgs {
    /// GitHub API token
    #[arg(long, global = true, env = "GITHUB_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Sleep until the quota resets instead of failing
    #[arg(long, global = true)]
    wait_on_rate_limit: bool,

    /// Remaining requests below which a warning is logged
    #[arg(long, global = true, default_value_t = 100)]
    rate_limit_threshold: u32,

    /// Retries for transient failures
    #[arg(long, global = true, default_value_t = 3)]
    max_retries: u32,

    /// Skip the open pull request count
    #[arg(long, global = true)]
    no_prs: bool,

    /// Skip merged PRs, issues, contributors and releases
    #[arg(long, global = true)]
    no_activity: bool,
}

#[derive(Args)]
struct WeightArgs {
    #[arg(long, global = true)]
    star_velocity_weight: Option<f64>,

    #[arg(long, global = true)]
    star_acceleration_weight: Option<f64>,

    #[arg(long, global = true)]
    contributor_growth_weight: Option<f64>,

    #[arg(long, global = true)]
    pr_velocity_weight: Option<f64>,

    #[arg(long, global = true)]
    issue_velocity_weight: Option<f64>,
}

impl WeightArgs {
    fn weights(&self) -> Weights {
        let defaults = Weights::default();
        Weights {
            star_velocity: self.star_velocity_weight.unwrap_or(defaults.star_velocity),
            star_acceleration: self
                .star_acceleration_weight
                .unwrap_or(defaults.star_acceleration),
            contributor_growth: self
                .contributor_growth_weight
                .unwrap_or(defaults.contributor_growth),
            pr_velocity: self.pr_velocity_weight.unwrap_or(defaults.pr_velocity),
            issue_velocity: self.issue_velocity_weight.unwrap_or(defaults.issue_velocity),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Follow repositories so that `scan` and `watch` pick them up
    Track {
        /// `owner/repo` or a github.com URL
        #[arg(required = true)]
        repos: Vec<RepoId>,

        /// Category to file the repositories under (repeatable)
        #[arg(short, long)]
        category: Vec<String>,
    },

    /// List tracked repositories
    List {
        #[arg(short, long)]
        category: Option<String>,
    },

    /// Scan repositories once and update their scores
    Scan {
        /// `owner/repo` or a github.com URL; every tracked repository when omitted
        repos: Vec<RepoId>,

        /// Only tracked repositories in this category
        #[arg(short, long, conflicts_with = "repos")]
        category: Option<String>,

        /// Skip repositories matching `owner/repo`, `owner/*` or `*/repo`
        #[arg(short, long)]
        exclude: Vec<ExclusionPattern>,
    },

    /// Rescan repositories on an interval until interrupted
    Watch {
        repos: Vec<RepoId>,

        #[arg(short, long, conflicts_with = "repos")]
        category: Option<String>,

        #[arg(short, long)]
        exclude: Vec<ExclusionPattern>,

        /// Time between scans, e.g. `30m` or `6h`
        #[arg(short, long, default_value = "6h", value_parser = humantime::parse_duration)]
        interval: Duration,
    },

    /// Show the highest-scoring repositories
    Top {
        #[arg(short, default_value_t = 10)]
        n: usize,
    },

    /// Recompute normalized scores across all tracked repositories
    Normalize {
        /// Rank by percentile instead of min-max scaling
        #[arg(long)]
        percentile: bool,
    },

    /// Show the stored state of a repository
    Status { repo: RepoId },

    /// Validate the token and show the current quota
    RateLimit,

    /// Search GitHub repositories
    Search {
        query: String,

        #[arg(long)]
        sort: Option<String>,

        #[arg(long)]
        order: Option<String>,

        #[arg(short, long, default_value_t = 30)]
        limit: u32,
    },

    /// Stop tracking a repository and drop its stored state
    Untrack { repo: RepoId },
}

/// Where a scan takes its repositories from
enum Targets {
    Explicit(Vec<RepoId>),
    Tracked {
        db: Database,
        category: Option<String>,
    },
}

impl Targets {
    fn new(repos: &[RepoId], category: Option<&str>, db: &Database) -> Self {
        if repos.is_empty() {
            Self::Tracked {
                db: db.clone(),
                category: category.map(str::to_string),
            }
        } else {
            Self::Explicit(repos.to_vec())
        }
    }

    /// Current repositories to scan, after exclusions. Tracked repositories
    /// are read again on every call.
    async fn resolve(&self, exclude: &[ExclusionPattern]) -> Result<Vec<RepoId>> {
        let repos = match self {
            Self::Explicit(repos) => repos.clone(),
            Self::Tracked { db, category } => db
                .list_tracked_repos(category.as_deref())
                .await?
                .into_iter()
                .map(|tracked| RepoId::new(tracked.owner, tracked.name))
                .collect(),
        };
        Ok(filter_excluded(repos, exclude))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json);
    run(&cli).await
}

/// Dispatch one command; the database is opened only by commands that use it
async fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Track { repos, category } => {
            let db = Database::connect(&cli.database).await?;
            track(&db, repos, category).await?;
        }
        Commands::List { category } => {
            let db = Database::connect(&cli.database).await?;
            list(&db, category.as_deref(), cli.json).await?;
        }
        Commands::Scan {
            repos,
            category,
            exclude,
        } => {
            let db = Database::connect(&cli.database).await?;
            let targets = Targets::new(repos, category.as_deref(), &db);
            let scanner = build_scanner(cli, db)?;
            scan(&scanner, &targets.resolve(exclude).await?).await?;
        }
        Commands::Watch {
            repos,
            category,
            exclude,
            interval,
        } => {
            let db = Database::connect(&cli.database).await?;
            let targets = Targets::new(repos, category.as_deref(), &db);
            let scanner = Arc::new(build_scanner(cli, db)?);
            watch(scanner, targets, exclude.clone(), *interval).await?;
        }
        Commands::Top { n } => {
            let db = Database::connect(&cli.database).await?;
            top(&db, *n, cli.json).await?;
        }
        Commands::Normalize { percentile } => {
            let db = Database::connect(&cli.database).await?;
            let method = if *percentile {
                Normalization::Percentile
            } else {
                Normalization::MinMax
            };
            let scored = normalize_store(&db, method).await?;
            println!("Normalized {} repositories ({:?})", scored.len(), method);
        }
        Commands::Status { repo } => {
            let db = Database::connect(&cli.database).await?;
            status(&db, repo, cli.json).await?;
        }
        Commands::RateLimit => {
            rate_limit(&*build_client(cli)?).await?;
        }
        Commands::Search {
            query,
            sort,
            order,
            limit,
        } => {
            let client = build_client(cli)?;
            let (sort, order) = (sort.as_deref(), order.as_deref());
            search(&client, query, sort, order, *limit, cli.json).await?;
        }
        Commands::Untrack { repo } => {
            let db = Database::connect(&cli.database).await?;
            untrack(&db, repo).await?;
            println!("No longer tracking {}", repo);
        }
    }

    Ok(())
}

fn init_logging(verbose: bool, json: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = FmtSubscriber::builder().with_env_filter(filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

fn build_client(cli: &Cli) -> Result<Arc<GithubClient>> {
    let args = &cli.github;
    let token = args
        .token
        .clone()
        .ok_or_else(|| anyhow!("A GitHub token is required: pass --token or set GITHUB_TOKEN"))?;

    let config = ClientConfig {
        rate_limit: RateLimitOptions {
            threshold: args.rate_limit_threshold,
            wait_on_exhaustion: args.wait_on_rate_limit,
            on_warning: None,
        },
        retry: RetryConfig {
            max_retries: args.max_retries,
            ..RetryConfig::default()
        },
        ..ClientConfig::with_token(token)
    };

    Ok(Arc::new(GithubClient::new(config)?))
}

fn build_scanner(cli: &Cli, db: Database) -> Result<Scanner> {
    let options = CollectorOptions {
        collect_prs: !cli.github.no_prs,
        collect_activity: !cli.github.no_activity,
    };
    let scanner = Scanner::with_options(build_client(cli)?, Arc::new(db), options);
    scanner.set_weights(cli.weights.weights())?;
    Ok(scanner)
}

async fn track(db: &Database, repos: &[RepoId], categories: &[String]) -> Result<()> {
    for repo in dedup_repos(repos.to_vec()) {
        let tracked = db
            .track_repo(&repo.key(), &repo.owner, &repo.name, categories)
            .await?;
        println!("Tracking {} [{}]", tracked.full_name(), tracked.categories.join(", "));
    }
    Ok(())
}

async fn list(db: &Database, category: Option<&str>, json: bool) -> Result<()> {
    let tracked = db.list_tracked_repos(category).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&tracked)?);
        return Ok(());
    }

    if tracked.is_empty() {
        println!("No repositories tracked. Add some with 'rv track owner/repo'.");
        return Ok(());
    }

    println!("{:<40} {:<30} {:<20}", "REPOSITORY", "CATEGORIES", "ADDED");
    println!("{}", "-".repeat(92));
    for repo in &tracked {
        print_tracked(repo);
    }

    if category.is_none() {
        println!();
        println!("Categories: {}", db.tracked_categories().await?.join(", "));
    }
    Ok(())
}

fn print_tracked(repo: &TrackedRepo) {
    println!(
        "{:<40} {:<30} {:<20}",
        repo.full_name(),
        repo.categories.join(", "),
        repo.added_at.format("%Y-%m-%d %H:%M")
    );
}

/// Drop the tracked entry and the stored state; fails only when neither existed
async fn untrack(db: &Database, repo: &RepoId) -> Result<()> {
    let key = repo.key();
    let was_tracked = db.untrack_repo(&key).await?;
    let had_state = match db.remove_repo_state(&key).await {
        Ok(()) => true,
        Err(DatabaseError::NotFound(_)) => false,
        Err(e) => return Err(e.into()),
    };

    if !was_tracked && !had_state {
        return Err(anyhow!("{repo} is not tracked"));
    }
    Ok(())
}

async fn scan(scanner: &Scanner, repos: &[RepoId]) -> Result<()> {
    if repos.is_empty() {
        println!("Nothing to scan. Pass repositories or add some with 'rv track'.");
        return Ok(());
    }

    let summary = scanner.scan(&CancellationToken::new(), repos).await?;
    print_summary(&summary);
    Ok(())
}

async fn watch(
    scanner: Arc<Scanner>,
    targets: Targets,
    exclude: Vec<ExclusionPattern>,
    interval: Duration,
) -> Result<()> {
    let initial = targets.resolve(&exclude).await?;
    if initial.is_empty() {
        println!("Nothing to watch. Pass repositories or add some with 'rv track'.");
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling scan");
            shutdown.cancel();
        }
    });

    info!(
        repos = initial.len(),
        interval = %humantime::format_duration(interval),
        "Watching repositories"
    );

    let targets = Arc::new(targets);
    let exclude = Arc::new(exclude);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut in_flight: Vec<JoinHandle<()>> = Vec::new();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        in_flight.retain(|handle| !handle.is_finished());

        let scanner = scanner.clone();
        let targets = targets.clone();
        let exclude = exclude.clone();
        let cancel = cancel.clone();
        in_flight.push(tokio::spawn(async move {
            match targets.resolve(&exclude).await {
                Ok(repos) if repos.is_empty() => warn!("No repositories to scan, skipping tick"),
                Ok(repos) => scheduled_scan(&scanner, &cancel, &repos).await,
                Err(e) => error!(error = %e, "Failed to load tracked repositories"),
            }
        }));
    }

    for handle in in_flight {
        handle.await?;
    }
    Ok(())
}

async fn scheduled_scan(scanner: &Scanner, cancel: &CancellationToken, repos: &[RepoId]) {
    match scanner.scan(cancel, repos).await {
        Ok(summary) => print_summary(&summary),
        Err(ScanError::AlreadyRunning) => warn!("Previous scan still running, skipping this tick"),
        Err(ScanError::Cancelled { summary }) => {
            warn!(
                processed = summary.processed(),
                total = summary.total,
                "Scan cancelled"
            );
            print_summary(&summary);
        }
        Err(e) => error!(error = %e, "Scan failed"),
    }
}

fn print_summary(summary: &ScanSummary) {
    println!(
        "Scanned {} repositories in {:.1}s: {} updated, {} unchanged, {} failed",
        summary.total,
        summary.duration().num_milliseconds() as f64 / 1000.0,
        summary.successful,
        summary.skipped,
        summary.failed
    );
    for failure in &summary.failures {
        println!("  {} - {}", failure.repo, failure.reason);
    }
}

async fn top(db: &Database, n: usize, json: bool) -> Result<()> {
    let ranked = top_from_store(db, n).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&ranked)?);
        return Ok(());
    }

    if ranked.is_empty() {
        println!("No repositories tracked yet. Run 'rv scan' first.");
        return Ok(());
    }

    println!(
        "{:<5} {:<40} {:>8} {:>10} {:>10}",
        "RANK", "REPOSITORY", "SCORE", "STARS/DAY", "RAW"
    );
    println!("{}", "-".repeat(77));
    for (idx, repo) in ranked.iter().enumerate() {
        println!(
            "{:<5} {:<40} {:>8.2} {:>10.2} {:>10.2}",
            idx + 1,
            repo.full_name,
            repo.normalized_score,
            repo.velocities.star_velocity,
            repo.raw_score
        );
    }
    Ok(())
}

async fn status(db: &Database, repo: &RepoId, json: bool) -> Result<()> {
    let Some(state) = db.get_repo_state(&repo.key()).await? else {
        println!("{} has not been scanned yet.", repo);
        return Ok(());
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&state)?);
        return Ok(());
    }

    println!("Repository: {}", state.full_name());
    println!("Language: {}", state.language.as_deref().unwrap_or("-"));
    println!(
        "Last collected: {}",
        state
            .last_collected
            .map_or_else(|| "never".to_string(), |at| at.to_rfc3339())
    );
    println!();
    println!(
        "Growth Score: {:.2} (raw {:.2})",
        state.normalized_growth_score, state.growth_score
    );
    println!(
        "  Stars:        {} ({:+.2}/day, {:+.2} accel)",
        state.stars, state.star_velocity, state.star_acceleration
    );
    println!(
        "  Contributors: {} ({:+.2}/day)",
        state.contributors, state.contributor_growth
    );
    println!(
        "  Merged PRs:   {} in 7d ({:.2}/day)",
        state.merged_prs_7d, state.pr_velocity
    );
    println!(
        "  New issues:   {} in 7d ({:.2}/day)",
        state.new_issues_7d, state.issue_velocity
    );
    println!(
        "  Forks: {}  Open issues: {}  Open PRs: {}",
        state.forks, state.open_issues, state.open_prs
    );
    Ok(())
}

async fn rate_limit(client: &GithubClient) -> Result<()> {
    let quota = client.validate_token(&CancellationToken::new()).await?;

    println!("Token is valid.");
    println!("Remaining: {}/{}", quota.remaining, quota.limit);
    match quota.reset {
        Some(reset) => println!("Resets at: {}", reset.to_rfc3339()),
        None => println!("Resets at: unknown"),
    }
    Ok(())
}

async fn search(
    client: &GithubClient,
    query: &str,
    sort: Option<&str>,
    order: Option<&str>,
    limit: u32,
    json: bool,
) -> Result<()> {
    let results = client
        .search_repositories(&CancellationToken::new(), query, sort, order, limit)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    println!("{:<40} {:>8} {:>6} {:<12}", "REPOSITORY", "STARS", "FORKS", "LANGUAGE");
    println!("{}", "-".repeat(69));
    for repo in &results {
        println!(
            "{:<40} {:>8} {:>6} {:<12}",
            repo.full_name,
            repo.stars,
            repo.forks,
            repo.language.as_deref().unwrap_or("-")
        );
    }
    if results.is_empty() {
        println!("No repositories matched.");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use repovitals_database::RepoState;

    fn repo(s: &str) -> RepoId {
        RepoId::parse(s).unwrap()
    }

    #[test]
    fn scan_without_repos_parses() {
        let cli = Cli::try_parse_from(["rv", "scan", "--category", "web"]).unwrap();
        match cli.command {
            Commands::Scan { repos, category, .. } => {
                assert!(repos.is_empty());
                assert_eq!(category.as_deref(), Some("web"));
            }
            _ => panic!("expected scan"),
        }
    }

    #[test]
    fn category_conflicts_with_explicit_repos() {
        assert!(Cli::try_parse_from(["rv", "scan", "a/b", "--category", "web"]).is_err());
    }

    #[test]
    fn track_takes_repeated_categories() {
        let cli = Cli::try_parse_from(["rv", "track", "a/b", "c/d", "-c", "web", "-c", "cli"])
            .unwrap();
        match cli.command {
            Commands::Track { repos, category } => {
                assert_eq!(repos, vec![repo("a/b"), repo("c/d")]);
                assert_eq!(category, vec!["web", "cli"]);
            }
            _ => panic!("expected track"),
        }
    }

    #[tokio::test]
    async fn tracked_targets_are_reloaded_on_every_resolve() {
        let db = Database::in_memory().await.unwrap();
        let targets = Targets::new(&[], None, &db);
        assert!(targets.resolve(&[]).await.unwrap().is_empty());

        track(&db, &[repo("a/one"), repo("b/two")], &[]).await.unwrap();
        let repos = targets.resolve(&[]).await.unwrap();
        assert_eq!(repos.len(), 2);

        let exclude = ["b/*".parse::<ExclusionPattern>().unwrap()];
        assert_eq!(targets.resolve(&exclude).await.unwrap(), vec![repo("a/one")]);
    }

    #[tokio::test]
    async fn tracked_targets_honor_the_category() {
        let db = Database::in_memory().await.unwrap();
        track(&db, &[repo("a/one")], &["web".to_string()]).await.unwrap();
        track(&db, &[repo("a/two")], &[]).await.unwrap();

        let targets = Targets::new(&[], Some("web"), &db);
        assert_eq!(targets.resolve(&[]).await.unwrap(), vec![repo("a/one")]);
    }

    #[tokio::test]
    async fn explicit_targets_ignore_the_tracker() {
        let db = Database::in_memory().await.unwrap();
        track(&db, &[repo("a/one")], &[]).await.unwrap();

        let targets = Targets::new(&[repo("z/z")], None, &db);
        assert_eq!(targets.resolve(&[]).await.unwrap(), vec![repo("z/z")]);
    }

    #[tokio::test]
    async fn network_only_commands_do_not_open_the_database() {
        let dir = std::env::temp_dir().join(format!("rv-cli-test-{}", std::process::id()));
        let path = dir.join("state.db");
        let db_arg = path.to_string_lossy().to_string();

        for command in [vec!["rate-limit"], vec!["search", "tokio"]] {
            let mut args = vec!["rv", "--database", db_arg.as_str()];
            args.extend(command);
            let mut cli = Cli::try_parse_from(args).unwrap();
            cli.github.token = None;

            let err = run(&cli).await.unwrap_err();
            assert!(err.to_string().contains("token is required"), "{err}");
            assert!(!dir.exists());
        }
    }

    #[tokio::test]
    async fn untrack_removes_entry_and_state() {
        let db = Database::in_memory().await.unwrap();
        track(&db, &[repo("Owner/Repo")], &[]).await.unwrap();
        db.set_repo_state("owner/repo", RepoState::default()).await.unwrap();

        untrack(&db, &repo("owner/REPO")).await.unwrap();
        assert!(db.list_tracked_repos(None).await.unwrap().is_empty());
        assert_eq!(db.repo_count().await.unwrap(), 0);

        assert!(untrack(&db, &repo("owner/repo")).await.is_err());
    }
}
