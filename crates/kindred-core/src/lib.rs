//! # Kindred Core Library
//!
//! Core business logic for Kindred, a service that matches a youth
//! participant with an elderly participant into a long-running virtual
//! companionship advancing through four ordered stages. All derivation
//! logic lives in this library; the CLI binary is a thin driver over it.
//!
//! ## Architecture
//!
//! - **Progression Engine**: a single-owner worker task that re-derives
//!   UI state from snapshot reads whenever a change notification, manual
//!   refresh, or countdown tick arrives
//! - **Source contract**: relationship records and requirement lists are
//!   owned by an external backing store reached through the
//!   [`RelationshipSource`] trait; the engine holds read-only copies
//! - **Pure calculators**: stage classification, completion percentage,
//!   cooling-off derivation, and milestone detection are side-effect-free
//!   and individually testable
//!
//! ## Key Components
//!
//! - [`ProgressionEngine`]: dispatcher, countdown, and projection publisher
//! - [`RelationshipSource`]: contract the backing store implements
//! - [`MemorySource`]: in-memory reference source for tests and embedders
//! - [`Projection`]: the atomic read-only aggregate handed to callers

pub mod cooling;
pub mod engine;
pub mod error;
pub mod events;
pub mod milestones;
pub mod model;
pub mod progress;
pub mod projection;
pub mod source;
pub mod stages;

pub use cooling::{format_remaining, CoolingPeriod};
pub use engine::{EngineConfig, ProgressionEngine};
pub use error::{EngineError, SourceError};
pub use events::{ActivitiesChanged, FeedMessage, RelationshipChanged, Subscription};
pub use milestones::{Achievement, AchievementKind, MilestoneOutcome, MilestoneTracker};
pub use model::{
    EndRequestStatus, RelationshipRecord, RelationshipStatus, Requirement, RequirementPreview,
    Stage, StageMetrics,
};
pub use projection::{CoolingStatus, ProgressView, Projection, StageDetail, ViewState};
pub use source::{MemorySource, RelationshipSource};
pub use stages::{StageClick, StageInfo, StageTransition};
