//! Stage state machine.
//!
//! The machine never mutates `current_stage` -- the policy layer owns that.
//! It only classifies the fixed stage ordering relative to the externally
//! supplied current value, detects which direction an observed transition
//! went, and resolves what a tap on a stage chip should do.

use serde::{Deserialize, Serialize};

use crate::model::Stage;

/// One entry per stage in the fixed ordering, computed fresh on every
/// evaluation pass. A stage that is neither current nor completed is locked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageInfo {
    pub stage: Stage,
    pub title: String,
    /// 1-based display order.
    pub order: u8,
    pub is_current: bool,
    pub is_completed: bool,
}

impl StageInfo {
    pub fn is_locked(&self) -> bool {
        !self.is_current && !self.is_completed
    }
}

/// Classify every stage relative to `current`: exactly one current entry,
/// completed entries are exactly the prefix before it, the rest locked.
pub fn classify(current: Stage) -> Vec<StageInfo> {
    let current_index = current.index();
    Stage::ALL
        .iter()
        .map(|&stage| StageInfo {
            stage,
            title: stage.title().to_string(),
            order: stage.order(),
            is_current: stage.index() == current_index,
            is_completed: stage.index() < current_index,
        })
        .collect()
}

/// Direction of an observed stage change between two snapshot reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageTransition {
    /// First snapshot this session; nothing to compare against.
    Initial,
    /// Same stage as before (metrics-only updates land here).
    Unchanged,
    /// Moved to a strictly higher index: the `from` stage was completed.
    Advanced { from: Stage, to: Stage },
    /// Moved to a strictly lower index. A policy-layer correction, not
    /// progress -- callers log it and must not celebrate.
    Reverted { from: Stage, to: Stage },
}

/// Compare the previously known stage against the newly observed one.
pub fn transition(prev: Option<Stage>, observed: Stage) -> StageTransition {
    match prev {
        None => StageTransition::Initial,
        Some(prev) if prev == observed => StageTransition::Unchanged,
        Some(prev) if observed.index() > prev.index() => StageTransition::Advanced {
            from: prev,
            to: observed,
        },
        Some(prev) => StageTransition::Reverted {
            from: prev,
            to: observed,
        },
    }
}

/// Resolution of a tap on a stage chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageClick {
    /// Tap on the current stage while no detail is open and the caller did
    /// not force it: nothing happens.
    Ignored,
    /// Tap on the current stage while a detail view is open: toggle closed.
    CloseDetail,
    /// Forced tap on the current stage ("view current stage anyway").
    OpenCurrent,
    /// Tap on an already-completed stage: show its completion detail.
    /// Never mutates progression state.
    CompletedDetail { stage: Stage },
    /// Tap on a locked stage: show a preview. `with_requirements` is true
    /// only for the immediate next stage; deeper stages get the generic
    /// "complete the previous stages first" message.
    LockedPreview { stage: Stage, with_requirements: bool },
}

/// Resolve a tap on `target` given the machine's view of `current`.
pub fn handle_stage_click(
    target: Stage,
    current: Stage,
    detail_open: bool,
    force: bool,
) -> StageClick {
    if target == current {
        if detail_open {
            return StageClick::CloseDetail;
        }
        if force {
            return StageClick::OpenCurrent;
        }
        return StageClick::Ignored;
    }

    if target.index() < current.index() {
        return StageClick::CompletedDetail { stage: target };
    }

    StageClick::LockedPreview {
        stage: target,
        with_requirements: current.next() == Some(target),
    }
}

/// Message shown under a locked stage's title.
pub fn unlock_message(target: Stage, current: Stage) -> String {
    if current.next() == Some(target) {
        format!(
            "Finish the {} activities to unlock {}",
            current.title(),
            target.title()
        )
    } else {
        "Complete the previous stages first".to_string()
    }
}
