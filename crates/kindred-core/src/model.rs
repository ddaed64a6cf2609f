//! Relationship data model.
//!
//! These types mirror the records owned by the backing store. The engine only
//! ever holds a read-only, possibly-stale copy of them -- every mutation
//! happens in the external policy layer and reaches us through the change
//! feeds or a fresh snapshot read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The four ordered phases a pair progresses through.
///
/// `FamilyLife` is terminal -- there is no transition beyond it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    GettingToKnow,
    TrialPeriod,
    OfficialCeremony,
    FamilyLife,
}

impl Stage {
    /// All stages in progression order.
    pub const ALL: [Stage; 4] = [
        Stage::GettingToKnow,
        Stage::TrialPeriod,
        Stage::OfficialCeremony,
        Stage::FamilyLife,
    ];

    /// 0-based position within the fixed ordering.
    pub fn index(self) -> usize {
        match self {
            Stage::GettingToKnow => 0,
            Stage::TrialPeriod => 1,
            Stage::OfficialCeremony => 2,
            Stage::FamilyLife => 3,
        }
    }

    /// 1-based display order.
    pub fn order(self) -> u8 {
        self.index() as u8 + 1
    }

    pub fn from_index(index: usize) -> Option<Stage> {
        Stage::ALL.get(index).copied()
    }

    /// The stage after this one, if any.
    pub fn next(self) -> Option<Stage> {
        Stage::from_index(self.index() + 1)
    }

    pub fn title(self) -> &'static str {
        match self {
            Stage::GettingToKnow => "Getting to Know",
            Stage::TrialPeriod => "Trial Period",
            Stage::OfficialCeremony => "Official Ceremony",
            Stage::FamilyLife => "Family Life",
        }
    }

    /// Stable machine-readable name, matching the serde representation.
    pub fn slug(self) -> &'static str {
        match self {
            Stage::GettingToKnow => "getting_to_know",
            Stage::TrialPeriod => "trial_period",
            Stage::OfficialCeremony => "official_ceremony",
            Stage::FamilyLife => "family_life",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.title())
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "getting_to_know" | "getting-to-know" => Ok(Stage::GettingToKnow),
            "trial_period" | "trial-period" | "trial" => Ok(Stage::TrialPeriod),
            "official_ceremony" | "official-ceremony" | "ceremony" => Ok(Stage::OfficialCeremony),
            "family_life" | "family-life" | "family" => Ok(Stage::FamilyLife),
            other => Err(format!("unknown stage: {other}")),
        }
    }
}

/// Lifecycle status of a relationship record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationshipStatus {
    Active,
    Paused,
    Ended,
}

impl std::fmt::Display for RelationshipStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelationshipStatus::Active => f.write_str("active"),
            RelationshipStatus::Paused => f.write_str("paused"),
            RelationshipStatus::Ended => f.write_str("ended"),
        }
    }
}

/// Progress of a withdrawal (end-of-relationship) request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndRequestStatus {
    None,
    PendingCooldown,
    UnderReview,
    Approved,
    Rejected,
}

impl std::fmt::Display for EndRequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EndRequestStatus::None => "none",
            EndRequestStatus::PendingCooldown => "pending_cooldown",
            EndRequestStatus::UnderReview => "under_review",
            EndRequestStatus::Approved => "approved",
            EndRequestStatus::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// Numeric counters maintained by the policy layer for the current stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageMetrics {
    pub message_count: u32,
    pub active_days: u32,
    pub video_call_count: u32,
    pub meeting_count: u32,
    /// Percentage cached by the policy layer; the engine recomputes its own.
    pub progress_pct: u8,
    pub requirements_met: bool,
}

/// The unit of progression: one matched youth/elder pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipRecord {
    pub id: String,
    pub youth_id: String,
    pub elder_id: String,
    pub current_stage: Stage,
    pub stage_start_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub status: RelationshipStatus,
    #[serde(default)]
    pub metrics: StageMetrics,
    #[serde(default = "default_end_request_status")]
    pub end_request_status: EndRequestStatus,
    #[serde(default)]
    pub end_request_by: Option<String>,
    #[serde(default)]
    pub end_request_reason: Option<String>,
    #[serde(default)]
    pub end_request_at: Option<DateTime<Utc>>,
}

fn default_end_request_status() -> EndRequestStatus {
    EndRequestStatus::None
}

impl RelationshipRecord {
    /// A fresh record as the match layer creates it when both sides accept.
    pub fn new(youth_id: impl Into<String>, elder_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            youth_id: youth_id.into(),
            elder_id: elder_id.into(),
            current_stage: Stage::GettingToKnow,
            stage_start_date: now,
            created_at: now,
            status: RelationshipStatus::Active,
            metrics: StageMetrics::default(),
            end_request_status: EndRequestStatus::None,
            end_request_by: None,
            end_request_reason: None,
            end_request_at: None,
        }
    }

    /// Whether `user_id` is one of the two participants.
    pub fn involves(&self, user_id: &str) -> bool {
        self.youth_id == user_id || self.elder_id == user_id
    }
}

/// One completable task gating stage advancement (a.k.a. activity).
///
/// Belongs to exactly one stage of exactly one relationship. Once
/// `is_completed` is set it is never reset by the engine -- only the policy
/// layer may do that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requirement {
    pub id: String,
    pub relationship_id: String,
    pub stage: Stage,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub is_completed: bool,
    /// Optional numeric goal (e.g. "chat on 5 separate days").
    #[serde(default)]
    pub target_value: Option<u32>,
    #[serde(default)]
    pub current_value: Option<u32>,
    /// Dual-signature fields: each participant can sign off independently.
    #[serde(default)]
    pub youth_signed: bool,
    #[serde(default)]
    pub elder_signed: bool,
}

impl Requirement {
    pub fn new(
        relationship_id: impl Into<String>,
        stage: Stage,
        title: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            relationship_id: relationship_id.into(),
            stage,
            title: title.into(),
            description: String::new(),
            is_completed: false,
            target_value: None,
            current_value: None,
            youth_signed: false,
            elder_signed: false,
        }
    }
}

/// Trimmed requirement line shown in a locked-stage preview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequirementPreview {
    pub title: String,
    pub description: String,
}

impl From<&Requirement> for RequirementPreview {
    fn from(req: &Requirement) -> Self {
        Self {
            title: req.title.clone(),
            description: req.description.clone(),
        }
    }
}
