//! Progress calculation.
//!
//! Pure functions over the requirement list and timestamps. No side
//! effects; an empty requirement list is a defined case (0%), not an error.

use chrono::{DateTime, Utc};

use crate::model::Requirement;

/// Integer completion percentage for a stage's requirement list:
/// `round(100 * completed / total)`, or 0 for an empty list.
pub fn completion_pct(requirements: &[Requirement]) -> u8 {
    if requirements.is_empty() {
        return 0;
    }
    let completed = requirements.iter().filter(|r| r.is_completed).count();
    let pct = 100.0 * completed as f64 / requirements.len() as f64;
    pct.round() as u8
}

/// Whole days elapsed since the pair was matched. Clamped at zero so a
/// slightly-future `created_at` (clock skew between store and engine) never
/// yields a negative day count.
pub fn days_together(created_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - created_at).num_days().max(0)
}
