//! RepoVitals Growth Analyzer
//!
//! Turns successive repository observations into velocity signals and a
//! weighted growth score that can be compared across the tracked population.
//! Everything in this crate is pure: no I/O and no shared mutable state.

mod normalize;
mod velocity;

pub use normalize::{normalize_scores, normalize_scores_percentile, rank_by_score, top_n};
pub use velocity::{
    contributor_growth, issue_velocity, pr_velocity, star_acceleration, star_velocity,
};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum AnalyzerError {
    #[error("scoring weight {name} must be a finite value >= 0, got {value}")]
    InvalidWeight { name: &'static str, value: f64 },
}

pub type Result<T> = std::result::Result<T, AnalyzerError>;

/// Weights applied to each velocity component of the growth score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Weights {
    pub star_velocity: f64,
    pub star_acceleration: f64,
    pub contributor_growth: f64,
    pub pr_velocity: f64,
    pub issue_velocity: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            star_velocity: 2.0,
            star_acceleration: 3.0,
            contributor_growth: 1.5,
            pr_velocity: 1.0,
            issue_velocity: 0.5,
        }
    }
}

impl Weights {
    /// Reject negative or non-finite weights
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("star_velocity", self.star_velocity),
            ("star_acceleration", self.star_acceleration),
            ("contributor_growth", self.contributor_growth),
            ("pr_velocity", self.pr_velocity),
            ("issue_velocity", self.issue_velocity),
        ];

        for (name, value) in fields {
            if !value.is_finite() || value < 0.0 {
                return Err(AnalyzerError::InvalidWeight { name, value });
            }
        }
        Ok(())
    }
}

/// Counters needed to derive velocities for one repository
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScoreInput {
    pub stars: i64,
    pub forks: i64,
    pub contributors: i64,

    /// Values from the previous observation; zero on the first one
    pub stars_prev: i64,
    pub contributors_prev: i64,

    /// 7-day activity window
    pub merged_prs_7d: i64,
    pub new_issues_7d: i64,

    /// Days since the previous observation
    pub days_elapsed: f64,

    /// Star velocity recorded at the previous observation
    pub prev_star_velocity: f64,
}

/// Per-day rates derived from two observations
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VelocityMetrics {
    pub star_velocity: f64,
    pub star_acceleration: f64,
    pub pr_velocity: f64,
    pub issue_velocity: f64,
    pub contributor_growth: f64,
}

/// A repository with its raw and normalized growth score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredRepo {
    pub full_name: String,
    pub velocities: VelocityMetrics,
    pub raw_score: f64,
    /// 0-100, only meaningful after normalization
    pub normalized_score: f64,
}

impl ScoredRepo {
    pub fn new(full_name: impl Into<String>, raw_score: f64) -> Self {
        Self {
            full_name: full_name.into(),
            velocities: VelocityMetrics::default(),
            raw_score,
            normalized_score: 0.0,
        }
    }
}

/// Growth score calculator
#[derive(Debug, Clone, Copy, Default)]
pub struct Calculator {
    weights: Weights,
}

impl Calculator {
    pub fn new(weights: Weights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> Weights {
        self.weights
    }

    /// Calculate all five velocity components
    pub fn velocities(&self, input: &ScoreInput) -> VelocityMetrics {
        let star_velocity = star_velocity(input.stars, input.stars_prev, input.days_elapsed);

        VelocityMetrics {
            star_velocity,
            star_acceleration: star_acceleration(star_velocity, input.prev_star_velocity),
            pr_velocity: pr_velocity(input.merged_prs_7d),
            issue_velocity: issue_velocity(input.new_issues_7d),
            contributor_growth: contributor_growth(
                input.contributors,
                input.contributors_prev,
                input.days_elapsed,
            ),
        }
    }

    /// Weighted sum of the velocity components
    pub fn raw_score(&self, v: &VelocityMetrics) -> f64 {
        let w = &self.weights;
        v.star_velocity * w.star_velocity
            + v.star_acceleration * w.star_acceleration
            + v.contributor_growth * w.contributor_growth
            + v.pr_velocity * w.pr_velocity
            + v.issue_velocity * w.issue_velocity
    }

    /// Score one repository; the normalized score is left at zero
    pub fn score(&self, full_name: &str, input: &ScoreInput) -> ScoredRepo {
        let velocities = self.velocities(input);
        ScoredRepo {
            full_name: full_name.to_string(),
            raw_score: self.raw_score(&velocities),
            velocities,
            normalized_score: 0.0,
        }
    }

    /// Score and min-max normalize a population
    pub fn score_all(&self, repos: &HashMap<String, ScoreInput>) -> Vec<ScoredRepo> {
        let mut scored: Vec<ScoredRepo> = repos
            .iter()
            .map(|(name, input)| self.score(name, input))
            .collect();
        normalize_scores(&mut scored);
        scored
    }
}
