//! The relationship source contract and an in-memory implementation.
//!
//! The source is the engine's only collaborator: it owns the records, it
//! enforces advancement policy, and it pushes change notifications. The
//! engine never writes through it except to file a withdrawal request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;

use crate::error::SourceError;
use crate::events::{ActivitiesChanged, RelationshipChanged, Subscription};
use crate::model::{
    EndRequestStatus, RelationshipRecord, RelationshipStatus, Requirement, Stage,
};

/// Abstract access to relationship state and its change feeds.
///
/// Implementations guarantee at-least-once notification delivery at best;
/// consumers must tolerate duplicates and reordering.
#[async_trait]
pub trait RelationshipSource: Send + Sync {
    /// The current (possibly recently ended) relationship for a user, or
    /// `None` when the user has never been matched.
    async fn relationship_snapshot(
        &self,
        user_id: &str,
    ) -> Result<Option<RelationshipRecord>, SourceError>;

    /// Requirement list for one stage of one relationship, in display order.
    async fn requirements(
        &self,
        relationship_id: &str,
        stage: Stage,
    ) -> Result<Vec<Requirement>, SourceError>;

    /// File a withdrawal request: pauses the relationship and starts the
    /// cooling window. Policy (who may file, how often) lives here.
    async fn request_withdrawal(
        &self,
        relationship_id: &str,
        user_id: &str,
        reason: &str,
    ) -> Result<(), SourceError>;

    /// Subscribe to relationship-record changes.
    fn subscribe_relationship(&self, relationship_id: &str) -> Subscription<RelationshipChanged>;

    /// Subscribe to requirement/activity-list changes.
    fn subscribe_activities(&self, relationship_id: &str) -> Subscription<ActivitiesChanged>;
}

const FEED_CAPACITY: usize = 64;

#[derive(Debug, Default)]
struct MemoryInner {
    record: Option<RelationshipRecord>,
    requirements: Vec<Requirement>,
}

/// In-memory source: the reference implementation of the contract.
///
/// Backs the engine's test suite and embedders that drive the engine from
/// state they already hold. Mutation helpers play the role of the external
/// policy layer and emit the matching change notifications.
#[derive(Debug)]
pub struct MemorySource {
    inner: Mutex<MemoryInner>,
    relationship_tx: broadcast::Sender<RelationshipChanged>,
    activities_tx: broadcast::Sender<ActivitiesChanged>,
    fail_reads: AtomicBool,
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySource {
    pub fn new() -> Self {
        let (relationship_tx, _) = broadcast::channel(FEED_CAPACITY);
        let (activities_tx, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            inner: Mutex::new(MemoryInner::default()),
            relationship_tx,
            activities_tx,
            fail_reads: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().expect("memory source lock poisoned")
    }

    /// Install a record and its requirement list, silently (no events).
    pub fn seed(&self, record: RelationshipRecord, requirements: Vec<Requirement>) {
        let mut inner = self.lock();
        inner.record = Some(record);
        inner.requirements = requirements;
    }

    /// Mutate the record as the policy layer would, then notify.
    pub fn update_relationship(&self, apply: impl FnOnce(&mut RelationshipRecord)) {
        let id = {
            let mut inner = self.lock();
            let Some(record) = inner.record.as_mut() else {
                return;
            };
            apply(record);
            record.id.clone()
        };
        self.notify_relationship(&id);
    }

    /// Mark one requirement completed, then notify. Never un-completes.
    pub fn complete_requirement(&self, requirement_id: &str) {
        let id = {
            let mut inner = self.lock();
            let Some(req) = inner
                .requirements
                .iter_mut()
                .find(|r| r.id == requirement_id)
            else {
                return;
            };
            req.is_completed = true;
            req.relationship_id.clone()
        };
        self.notify_activities(&id);
    }

    /// Replace the requirement list, then notify.
    pub fn set_requirements(&self, requirements: Vec<Requirement>) {
        let id = {
            let mut inner = self.lock();
            inner.requirements = requirements;
            inner.record.as_ref().map(|r| r.id.clone())
        };
        if let Some(id) = id {
            self.notify_activities(&id);
        }
    }

    /// Emit a relationship-changed event without mutating anything. Used to
    /// exercise duplicate and reordered delivery.
    pub fn notify_relationship(&self, relationship_id: &str) {
        let _ = self
            .relationship_tx
            .send(RelationshipChanged::now(relationship_id));
    }

    /// Emit an activities-changed event without mutating anything.
    pub fn notify_activities(&self, relationship_id: &str) {
        let _ = self
            .activities_tx
            .send(ActivitiesChanged::now(relationship_id));
    }

    /// Make every read fail with a transient error until cleared. Simulates
    /// a backend outage.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Live subscriber count on the relationship feed.
    pub fn relationship_subscribers(&self) -> usize {
        self.relationship_tx.receiver_count()
    }

    /// Live subscriber count on the activities feed.
    pub fn activity_subscribers(&self) -> usize {
        self.activities_tx.receiver_count()
    }

    fn check_available(&self) -> Result<(), SourceError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            Err(SourceError::Unavailable("simulated outage".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RelationshipSource for MemorySource {
    async fn relationship_snapshot(
        &self,
        user_id: &str,
    ) -> Result<Option<RelationshipRecord>, SourceError> {
        self.check_available()?;
        let inner = self.lock();
        Ok(inner
            .record
            .as_ref()
            .filter(|r| r.involves(user_id))
            .cloned())
    }

    async fn requirements(
        &self,
        relationship_id: &str,
        stage: Stage,
    ) -> Result<Vec<Requirement>, SourceError> {
        self.check_available()?;
        let inner = self.lock();
        Ok(inner
            .requirements
            .iter()
            .filter(|r| r.relationship_id == relationship_id && r.stage == stage)
            .cloned()
            .collect())
    }

    async fn request_withdrawal(
        &self,
        relationship_id: &str,
        user_id: &str,
        reason: &str,
    ) -> Result<(), SourceError> {
        self.check_available()?;
        let id = {
            let mut inner = self.lock();
            let record = inner
                .record
                .as_mut()
                .filter(|r| r.id == relationship_id)
                .ok_or_else(|| {
                    SourceError::Query(format!("unknown relationship: {relationship_id}"))
                })?;
            if !record.involves(user_id) {
                return Err(SourceError::Query(format!(
                    "user '{user_id}' is not a participant"
                )));
            }
            record.status = RelationshipStatus::Paused;
            record.end_request_status = EndRequestStatus::PendingCooldown;
            record.end_request_by = Some(user_id.to_string());
            record.end_request_reason = Some(reason.to_string());
            record.end_request_at = Some(Utc::now());
            record.id.clone()
        };
        self.notify_relationship(&id);
        Ok(())
    }

    fn subscribe_relationship(&self, _relationship_id: &str) -> Subscription<RelationshipChanged> {
        Subscription::new(self.relationship_tx.subscribe())
    }

    fn subscribe_activities(&self, _relationship_id: &str) -> Subscription<ActivitiesChanged> {
        Subscription::new(self.activities_tx.subscribe())
    }
}
