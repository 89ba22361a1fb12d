//! Persisted models for RepoVitals

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable record for one tracked repository
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RepoState {
    pub owner: String,
    pub name: String,

    pub stars: i64,
    pub stars_prev: i64,
    pub forks: i64,
    pub open_issues: i64,
    pub open_prs: i64,
    pub contributors: i64,
    pub contributors_prev: i64,
    pub merged_prs_7d: i64,
    pub new_issues_7d: i64,
    pub language: Option<String>,

    pub star_velocity: f64,
    pub star_acceleration: f64,
    pub pr_velocity: f64,
    pub issue_velocity: f64,
    pub contributor_growth: f64,
    pub growth_score: f64,
    pub normalized_growth_score: f64,

    /// Opaque cache validators from the last repository fetch
    pub etag: Option<String>,
    pub last_modified: Option<String>,

    pub last_collected: Option<DateTime<Utc>>,
}

impl RepoState {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// Days between the last collection and `now`; zero when never collected
    pub fn days_since_collected(&self, now: DateTime<Utc>) -> f64 {
        match self.last_collected {
            Some(last) => (now - last).num_milliseconds() as f64 / 86_400_000.0,
            None => 0.0,
        }
    }
}

/// Category assigned when a repository is tracked without one
pub const DEFAULT_CATEGORY: &str = "default";

/// A repository the user asked to follow, with its categories
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedRepo {
    pub owner: String,
    pub name: String,
    /// Sorted and free of duplicates
    pub categories: Vec<String>,
    pub added_at: DateTime<Utc>,
}

impl TrackedRepo {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    pub fn in_category(&self, category: &str) -> bool {
        self.categories.iter().any(|c| c == category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn days_since_collected() {
        let now = Utc::now();
        let state = RepoState {
            last_collected: Some(now - TimeDelta::hours(36)),
            ..Default::default()
        };
        assert!((state.days_since_collected(now) - 1.5).abs() < 1e-9);
    }

    #[test]
    fn never_collected_is_zero_days() {
        assert_eq!(RepoState::default().days_since_collected(Utc::now()), 0.0);
    }

    #[test]
    fn future_timestamp_is_negative() {
        let now = Utc::now();
        let state = RepoState {
            last_collected: Some(now + TimeDelta::days(1)),
            ..Default::default()
        };
        assert!(state.days_since_collected(now) < 0.0);
    }
}
