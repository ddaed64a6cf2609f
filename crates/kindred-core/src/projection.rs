//! Derived-state projection.
//!
//! The read-only aggregate the presentation layer renders from. One
//! `Projection` value is replaced wholesale per evaluation pass, so callers
//! never observe a partially-updated mix of old and new fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cooling::format_remaining;
use crate::milestones::Achievement;
use crate::model::{
    RelationshipStatus, Requirement, RequirementPreview, Stage, StageMetrics,
};
use crate::stages::StageInfo;

/// Cooling-off fields as the UI shows them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoolingStatus {
    /// Raw-flag truth: the pair is paused with a pending cooldown. Stays
    /// true even when the local countdown has already reached zero.
    pub is_in_cooling_period: bool,
    pub ends_at: DateTime<Utc>,
    pub remaining_secs: i64,
    /// `HH:MM:SS` rendering of `remaining_secs`.
    pub remaining_display: String,
    /// The window had already elapsed when last derived from a snapshot.
    pub lapsed: bool,
}

impl CoolingStatus {
    pub fn new(ends_at: DateTime<Utc>, remaining_secs: i64, lapsed: bool) -> Self {
        Self {
            is_in_cooling_period: true,
            ends_at,
            remaining_secs,
            remaining_display: format_remaining(remaining_secs),
            lapsed,
        }
    }
}

/// The currently-opened stage detail, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageDetail {
    /// Explicitly opened view of the in-progress stage.
    Current { stage: Stage },
    /// Celebration detail of an already-completed stage.
    Completed {
        stage: Stage,
        requirements: Vec<Requirement>,
    },
    /// Preview of a not-yet-unlocked stage. `requirements` is populated
    /// only for the immediate next stage.
    Locked {
        stage: Stage,
        unlock_message: String,
        requirements: Vec<RequirementPreview>,
    },
}

/// Everything derived from one relationship snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressView {
    pub relationship_id: String,
    pub status: RelationshipStatus,
    pub current_stage: Stage,
    pub stages: Vec<StageInfo>,
    /// Engine-computed percentage for the current stage's requirements.
    pub progress_pct: u8,
    pub days_together: i64,
    pub requirements: Vec<Requirement>,
    pub metrics: StageMetrics,
    pub achievements: Vec<Achievement>,
    /// Greatest day milestone at or below `days_together`.
    pub reached_milestone: Option<u32>,
    pub cooling: Option<CoolingStatus>,
    pub selected_detail: Option<StageDetail>,
}

/// Top-level view state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ViewState {
    /// Initial load has not completed yet.
    Loading,
    /// The source reported no relationship for this user -- expected for
    /// unmatched users, rendered as an empty/onboarding view.
    NoRelationship,
    /// Last-known-good derived state.
    Ready(ProgressView),
}

/// The atomic unit handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    pub state: ViewState,
    /// Set when an explicit user-initiated refresh failed; the view keeps
    /// showing last-known-good state alongside this retryable message.
    pub refresh_error: Option<String>,
    /// Bumped on every published evaluation pass.
    pub revision: u64,
    pub generated_at: DateTime<Utc>,
}

impl Projection {
    pub fn loading() -> Self {
        Self {
            state: ViewState::Loading,
            refresh_error: None,
            revision: 0,
            generated_at: Utc::now(),
        }
    }

    /// Convenience accessor for the ready view, if any.
    pub fn view(&self) -> Option<&ProgressView> {
        match &self.state {
            ViewState::Ready(view) => Some(view),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cooling_status_formats_remaining() {
        let status = CoolingStatus::new(Utc::now(), 3600, false);
        assert!(status.is_in_cooling_period);
        assert_eq!(status.remaining_display, "01:00:00");
    }

    #[test]
    fn loading_projection_has_no_view() {
        let projection = Projection::loading();
        assert!(projection.view().is_none());
        assert_eq!(projection.revision, 0);
    }
}
