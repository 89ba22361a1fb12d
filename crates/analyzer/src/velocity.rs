//! Per-day rate calculations

/// Stars gained per day; negative when stars were lost
pub fn star_velocity(current: i64, previous: i64, days_elapsed: f64) -> f64 {
    per_day(current, previous, days_elapsed)
}

/// Change in star velocity between two observations
pub fn star_acceleration(current_velocity: f64, previous_velocity: f64) -> f64 {
    current_velocity - previous_velocity
}

/// Merged PRs per day over a 7-day window
pub fn pr_velocity(merged_7d: i64) -> f64 {
    merged_7d as f64 / 7.0
}

/// Issues opened per day over a 7-day window
pub fn issue_velocity(opened_7d: i64) -> f64 {
    opened_7d as f64 / 7.0
}

/// Contributors gained per day
pub fn contributor_growth(current: i64, previous: i64, days_elapsed: f64) -> f64 {
    per_day(current, previous, days_elapsed)
}

// Elapsed time of zero or less (first observation, clock skew) yields 0.
fn per_day(current: i64, previous: i64, days_elapsed: f64) -> f64 {
    if days_elapsed > 0.0 {
        (current - previous) as f64 / days_elapsed
    } else {
        0.0
    }
}
