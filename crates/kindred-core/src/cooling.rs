//! Withdrawal cooling-off derivation and local countdown.
//!
//! The cooling period is derived once from snapshot fields, then ticked
//! down locally without re-querying the source. The countdown is optimistic
//! display state only: the authoritative end-of-cooldown transition belongs
//! to the policy layer, so the in-cooling flag clears only when a fresh
//! snapshot clears the raw fields.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{EndRequestStatus, RelationshipRecord, RelationshipStatus};

/// Derived view of an active cooling-off window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoolingPeriod {
    pub ends_at: DateTime<Utc>,
    /// Seconds left, clamped at zero.
    pub remaining_secs: i64,
    /// The window already elapsed in the snapshot (stale data or clock
    /// skew). Treated as locally satisfied while the raw flags still say
    /// the pair is cooling.
    pub lapsed: bool,
}

impl CoolingPeriod {
    /// Derive the cooling window from raw record fields, or `None` when the
    /// record is not paused with a pending cooldown.
    pub fn derive(
        record: &RelationshipRecord,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Option<CoolingPeriod> {
        if record.status != RelationshipStatus::Paused
            || record.end_request_status != EndRequestStatus::PendingCooldown
        {
            return None;
        }
        let requested_at = record.end_request_at?;
        let ends_at = requested_at + window;
        let remaining_secs = (ends_at - now).num_seconds().max(0);
        Some(CoolingPeriod {
            ends_at,
            remaining_secs,
            lapsed: remaining_secs == 0,
        })
    }
}

/// The locally-ticked countdown for one cooling target.
///
/// Exactly one of these lives in the engine at a time; re-deriving the same
/// `ends_at` target must reuse it rather than reset it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Countdown {
    pub ends_at: DateTime<Utc>,
    pub remaining_secs: i64,
    /// Carried over from the deriving snapshot (see [`CoolingPeriod::lapsed`]).
    pub lapsed: bool,
}

impl Countdown {
    pub fn new(period: &CoolingPeriod) -> Self {
        Self {
            ends_at: period.ends_at,
            remaining_secs: period.remaining_secs,
            lapsed: period.lapsed,
        }
    }

    /// Whether the local tick should keep running.
    pub fn ticking(&self) -> bool {
        self.remaining_secs > 0
    }

    /// One local second elapsed. Never goes below zero.
    pub fn tick(&mut self) {
        if self.remaining_secs > 0 {
            self.remaining_secs -= 1;
        }
    }
}

/// `HH:MM:SS` rendering of a remaining-seconds value.
pub fn format_remaining(secs: i64) -> String {
    let secs = secs.max(0);
    format!(
        "{:02}:{:02}:{:02}",
        secs / 3600,
        (secs % 3600) / 60,
        secs % 60
    )
}
