//! Milestone detection.
//!
//! Day-count and video-call thresholds produce one-time celebration
//! signals. The shown-set is deliberately process-local and dies with the
//! engine: a new session may re-surface a milestone, which is accepted
//! behavior (celebrate at most once per session).

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Day thresholds, ascending, with display titles.
pub const DAY_MILESTONES: [(u32, &str); 7] = [
    (7, "First Week"),
    (14, "Two Weeks"),
    (30, "First Month"),
    (60, "Two Months"),
    (90, "Three Months"),
    (180, "Half a Year"),
    (365, "First Year"),
];

/// Video-call count thresholds, ascending, with display titles.
pub const VIDEO_CALL_MILESTONES: [(u32, &str); 2] =
    [(5, "Five Video Calls"), (10, "Ten Video Calls")];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AchievementKind {
    DaysTogether,
    VideoCalls,
}

/// One earned celebration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Achievement {
    pub kind: AchievementKind,
    pub threshold: u32,
    pub title: String,
}

impl Achievement {
    fn days(threshold: u32, title: &str) -> Self {
        Self {
            kind: AchievementKind::DaysTogether,
            threshold,
            title: title.to_string(),
        }
    }

    fn calls(threshold: u32, title: &str) -> Self {
        Self {
            kind: AchievementKind::VideoCalls,
            threshold,
            title: title.to_string(),
        }
    }
}

/// Result of one milestone evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MilestoneOutcome {
    /// Greatest day threshold at or below the current day count, if any.
    pub reached: Option<u32>,
    /// Every achievement earned so far, day and call thresholds combined.
    pub achievements: Vec<Achievement>,
    /// Achievements crossing their threshold for the first time this
    /// session. Empty on re-evaluation of the same counts.
    pub newly_reached: Vec<Achievement>,
}

impl MilestoneOutcome {
    /// The achievement to celebrate now. When several thresholds cross in
    /// one pass (catching up after days offline), the greatest day
    /// milestone wins; call milestones only when no day milestone fired.
    pub fn celebration(&self) -> Option<&Achievement> {
        self.newly_reached
            .iter()
            .filter(|a| a.kind == AchievementKind::DaysTogether)
            .last()
            .or_else(|| self.newly_reached.last())
    }
}

/// Tracks which thresholds were already surfaced this session.
#[derive(Debug, Default)]
pub struct MilestoneTracker {
    shown_days: HashSet<u32>,
    shown_calls: HashSet<u32>,
}

impl MilestoneTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate thresholds against the current counters. Thresholds are
    /// independent of stage; a threshold that was already surfaced never
    /// re-fires for the lifetime of this tracker.
    pub fn evaluate(&mut self, days_together: i64, video_calls: u32) -> MilestoneOutcome {
        let mut achievements = Vec::new();
        let mut newly_reached = Vec::new();
        let mut reached = None;

        for (threshold, title) in DAY_MILESTONES {
            if i64::from(threshold) <= days_together {
                reached = Some(threshold);
                achievements.push(Achievement::days(threshold, title));
                if self.shown_days.insert(threshold) {
                    newly_reached.push(Achievement::days(threshold, title));
                }
            }
        }

        for (threshold, title) in VIDEO_CALL_MILESTONES {
            if threshold <= video_calls {
                achievements.push(Achievement::calls(threshold, title));
                if self.shown_calls.insert(threshold) {
                    newly_reached.push(Achievement::calls(threshold, title));
                }
            }
        }

        MilestoneOutcome {
            reached,
            achievements,
            newly_reached,
        }
    }
}
