//! Population-wide score normalization and ranking

use crate::ScoredRepo;

const SINGLE_REPO_SCORE: f64 = 50.0;

/// Min-max scale raw scores to 0-100, rounded to two decimals.
///
/// A single repository, or a population where every raw score is equal,
/// gets 50 across the board.
pub fn normalize_scores(repos: &mut [ScoredRepo]) {
    match repos.len() {
        0 => return,
        1 => {
            repos[0].normalized_score = SINGLE_REPO_SCORE;
            return;
        }
        _ => {}
    }

    let (min, max) = repos.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), r| {
        (lo.min(r.raw_score), hi.max(r.raw_score))
    });

    let range = max - min;
    if range == 0.0 {
        for repo in repos.iter_mut() {
            repo.normalized_score = SINGLE_REPO_SCORE;
        }
        return;
    }

    for repo in repos.iter_mut() {
        let scaled = ((repo.raw_score - min) / range * 100.0).clamp(0.0, 100.0);
        repo.normalized_score = round2(scaled);
    }
}

/// Percentile-rank normalization, less sensitive to outliers than min-max
pub fn normalize_scores_percentile(repos: &mut [ScoredRepo]) {
    match repos.len() {
        0 => return,
        1 => {
            repos[0].normalized_score = SINGLE_REPO_SCORE;
            return;
        }
        _ => {}
    }

    let mut order: Vec<usize> = (0..repos.len()).collect();
    order.sort_by(|&a, &b| repos[a].raw_score.total_cmp(&repos[b].raw_score));

    let last = (repos.len() - 1) as f64;
    for (rank, idx) in order.into_iter().enumerate() {
        repos[idx].normalized_score = round2(rank as f64 / last * 100.0);
    }
}

/// Sorted copy, highest normalized score first
pub fn rank_by_score(repos: &[ScoredRepo]) -> Vec<ScoredRepo> {
    let mut ranked = repos.to_vec();
    ranked.sort_by(|a, b| b.normalized_score.total_cmp(&a.normalized_score));
    ranked
}

/// Top `n` repositories by normalized score
pub fn top_n(repos: &[ScoredRepo], n: usize) -> Vec<ScoredRepo> {
    let mut ranked = rank_by_score(repos);
    ranked.truncate(n);
    ranked
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
