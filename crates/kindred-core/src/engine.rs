//! The relationship progression engine.
//!
//! One single-owner worker task multiplexes the two change feeds, the
//! caller's command channel, and the cooling countdown tick through a biased
//! `select!` loop. Every evaluation pass re-reads the snapshot from the
//! source (never trusting event payloads) and replaces the published
//! projection wholesale, so duplicate or reordered notifications degrade to
//! harmless recomputation and callers never observe a half-updated view.
//!
//! ## Usage
//!
//! ```ignore
//! let engine = ProgressionEngine::start(source, "user-1", EngineConfig::default());
//! engine.refresh().await?;
//! let projection = engine.projection();
//! if let Some(stage) = engine.take_stage_completed() {
//!     // navigate to the celebration screen
//! }
//! engine.dispose().await;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::cooling::{CoolingPeriod, Countdown};
use crate::error::EngineError;
use crate::events::{ActivitiesChanged, FeedMessage, RelationshipChanged, Subscription};
use crate::milestones::{Achievement, MilestoneTracker};
use crate::model::{RelationshipRecord, RequirementPreview, Requirement, Stage};
use crate::projection::{CoolingStatus, ProgressView, Projection, StageDetail, ViewState};
use crate::source::RelationshipSource;
use crate::stages::{self, StageClick, StageTransition};
use crate::progress;

/// Tunables for one engine instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Length of the withdrawal cooling-off window.
    pub cooling_window: chrono::Duration,
    /// Cadence of the local countdown tick.
    pub tick_interval: std::time::Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cooling_window: chrono::Duration::hours(24),
            tick_interval: std::time::Duration::from_secs(1),
        }
    }
}

/// One-shot navigation signals, each consumed exactly once.
#[derive(Debug, Default)]
struct PendingIntents {
    stage_completed: Option<Stage>,
    milestone: Option<Achievement>,
    cooling_period: bool,
}

struct Shared {
    projection: Mutex<Projection>,
    intents: Mutex<PendingIntents>,
    disposed: AtomicBool,
}

impl Shared {
    fn new() -> Self {
        Self {
            projection: Mutex::new(Projection::loading()),
            intents: Mutex::new(PendingIntents::default()),
            disposed: AtomicBool::new(false),
        }
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn intents(&self) -> MutexGuard<'_, PendingIntents> {
        self.intents.lock().expect("intents lock poisoned")
    }
}

enum Command {
    Refresh {
        ack: oneshot::Sender<Result<(), EngineError>>,
    },
    SelectStage {
        target: Stage,
        force: bool,
        ack: oneshot::Sender<Result<(), EngineError>>,
    },
    SubmitWithdrawal {
        reason: String,
        ack: oneshot::Sender<Result<(), EngineError>>,
    },
    Dispose {
        ack: Option<oneshot::Sender<()>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshCause {
    /// First load after construction.
    Initial,
    /// Explicit caller request; failures surface a retryable message.
    User,
    /// Notification-triggered; failures are swallowed with a log line and
    /// never clear last-known-good state.
    Background,
}

/// Caller-facing handle on the engine.
///
/// Constructible and disposable -- no process-wide singleton. Dropping the
/// handle without calling [`ProgressionEngine::dispose`] still shuts the
/// worker down, just without waiting for it.
pub struct ProgressionEngine {
    cmd_tx: mpsc::Sender<Command>,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl ProgressionEngine {
    /// Spawn the engine worker and kick off the initial load.
    pub fn start(
        source: Arc<dyn RelationshipSource>,
        user_id: impl Into<String>,
        config: EngineConfig,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let shared = Arc::new(Shared::new());
        let worker = Worker {
            source,
            user_id: user_id.into(),
            config,
            shared: Arc::clone(&shared),
            relationship_id: None,
            rel_feed: None,
            act_feed: None,
            record: None,
            requirements: Vec::new(),
            achievements: Vec::new(),
            reached_milestone: None,
            selected_detail: None,
            prev_stage: None,
            milestones: MilestoneTracker::new(),
            countdown: None,
            loaded: false,
            refresh_error: None,
            revision: 0,
            eval_seq: 0,
            applied_seq: 0,
        };
        let handle = tokio::spawn(worker.run(cmd_rx));
        Self {
            cmd_tx,
            shared,
            worker: Some(handle),
        }
    }

    /// Clone of the latest atomically-published projection.
    pub fn projection(&self) -> Projection {
        self.shared
            .projection
            .lock()
            .expect("projection lock poisoned")
            .clone()
    }

    /// One-shot: the stage whose completion should be celebrated.
    pub fn take_stage_completed(&self) -> Option<Stage> {
        self.shared.intents().stage_completed.take()
    }

    /// One-shot: the milestone achievement to celebrate.
    pub fn take_milestone(&self) -> Option<Achievement> {
        self.shared.intents().milestone.take()
    }

    /// One-shot: navigate to the cooling-period screen.
    pub fn take_cooling_period(&self) -> bool {
        std::mem::take(&mut self.shared.intents().cooling_period)
    }

    /// Re-read everything from the source. Errors are retryable.
    pub async fn refresh(&self) -> Result<(), EngineError> {
        self.roundtrip(|ack| Command::Refresh { ack }).await
    }

    /// Resolve a tap on a stage chip; the outcome lands in
    /// `projection().view().selected_detail`.
    pub async fn select_stage(&self, target: Stage, force: bool) -> Result<(), EngineError> {
        self.roundtrip(|ack| Command::SelectStage { target, force, ack })
            .await
    }

    /// File a withdrawal request for the engine's user, then re-evaluate.
    pub async fn submit_withdrawal(&self, reason: &str) -> Result<(), EngineError> {
        let reason = reason.to_string();
        self.roundtrip(|ack| Command::SubmitWithdrawal { reason, ack })
            .await
    }

    /// Tear the engine down: cancels both subscriptions, stops the
    /// countdown, and waits for the worker to exit.
    pub async fn dispose(mut self) {
        let (tx, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(Command::Dispose { ack: Some(tx) })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
    }

    async fn roundtrip(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<(), EngineError>>) -> Command,
    ) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .await
            .map_err(|_| EngineError::Disposed)?;
        rx.await.map_err(|_| EngineError::Disposed)?
    }
}

impl Drop for ProgressionEngine {
    fn drop(&mut self) {
        if !self.shared.is_disposed() {
            let _ = self.cmd_tx.try_send(Command::Dispose { ack: None });
        }
    }
}

enum Input {
    Relationship(FeedMessage<RelationshipChanged>),
    Activities(FeedMessage<ActivitiesChanged>),
    Tick,
    Command(Option<Command>),
}

/// Await the next message on an optional feed; a missing feed pends forever
/// so its select arm simply never fires.
async fn next_message<T: Clone>(feed: Option<&mut Subscription<T>>) -> FeedMessage<T> {
    match feed {
        Some(feed) => feed.next().await,
        None => std::future::pending().await,
    }
}

struct Worker {
    source: Arc<dyn RelationshipSource>,
    user_id: String,
    config: EngineConfig,
    shared: Arc<Shared>,
    /// Id of the relationship both feeds are currently scoped to.
    relationship_id: Option<String>,
    rel_feed: Option<Subscription<RelationshipChanged>>,
    act_feed: Option<Subscription<ActivitiesChanged>>,
    /// Last-known-good snapshot copy.
    record: Option<RelationshipRecord>,
    /// Requirement list of the current stage.
    requirements: Vec<Requirement>,
    achievements: Vec<Achievement>,
    reached_milestone: Option<u32>,
    selected_detail: Option<StageDetail>,
    /// Stage observed on the previous pass; `None` until first sync.
    prev_stage: Option<Stage>,
    milestones: MilestoneTracker,
    countdown: Option<Countdown>,
    /// False until the first snapshot read resolves (found or not-found).
    loaded: bool,
    refresh_error: Option<String>,
    revision: u64,
    eval_seq: u64,
    applied_seq: u64,
}

impl Worker {
    async fn run(mut self, mut cmd_rx: mpsc::Receiver<Command>) {
        if let Err(err) = self.evaluate(RefreshCause::Initial).await {
            warn!(error = %err, "initial load failed; will retry on refresh or notification");
        }

        let mut tick = tokio::time::interval_at(
            tokio::time::Instant::now() + self.config.tick_interval,
            self.config.tick_interval,
        );
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let ticking = self.countdown.is_some_and(|c| c.ticking());
            // Biased order drains already-queued notifications before
            // commands, so a command observes the state they produced.
            let input = {
                let rel = self.rel_feed.as_mut();
                let act = self.act_feed.as_mut();
                tokio::select! {
                    biased;
                    msg = next_message(rel) => Input::Relationship(msg),
                    msg = next_message(act) => Input::Activities(msg),
                    _ = tick.tick(), if ticking => Input::Tick,
                    cmd = cmd_rx.recv() => Input::Command(cmd),
                }
            };

            match input {
                Input::Command(None) => break,
                Input::Command(Some(cmd)) => {
                    if self.handle_command(cmd).await {
                        break;
                    }
                }
                Input::Relationship(FeedMessage::Closed) => {
                    debug!("relationship feed closed");
                    self.rel_feed = None;
                }
                Input::Relationship(msg) => {
                    self.coalesce_relationship(msg);
                    // Background semantics: evaluate() already swallowed and
                    // logged any read failure.
                    let _ = self.evaluate(RefreshCause::Background).await;
                }
                Input::Activities(FeedMessage::Closed) => {
                    debug!("activities feed closed");
                    self.act_feed = None;
                }
                Input::Activities(msg) => {
                    self.coalesce_activities(msg);
                    self.refresh_requirements().await;
                }
                Input::Tick => self.on_tick(),
            }
        }

        self.teardown();
    }

    /// Returns true when the worker should stop.
    async fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Refresh { ack } => {
                let result = self.evaluate(RefreshCause::User).await;
                let _ = ack.send(result);
                false
            }
            Command::SelectStage { target, force, ack } => {
                let result = self.select_stage(target, force).await;
                let _ = ack.send(result);
                false
            }
            Command::SubmitWithdrawal { reason, ack } => {
                let result = self.submit_withdrawal(&reason).await;
                let _ = ack.send(result);
                false
            }
            Command::Dispose { ack } => {
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
                true
            }
        }
    }

    fn coalesce_relationship(&mut self, first: FeedMessage<RelationshipChanged>) {
        if let FeedMessage::Lagged(n) = first {
            debug!(missed = n, "relationship feed lagged; re-deriving from snapshot");
        }
        if let Some(feed) = self.rel_feed.as_mut() {
            let drained = feed.drain();
            if drained > 0 {
                debug!(drained, "coalesced queued relationship notifications");
            }
        }
    }

    fn coalesce_activities(&mut self, first: FeedMessage<ActivitiesChanged>) {
        if let FeedMessage::Lagged(n) = first {
            debug!(missed = n, "activities feed lagged; re-deriving from snapshot");
        }
        if let Some(feed) = self.act_feed.as_mut() {
            let drained = feed.drain();
            if drained > 0 {
                debug!(drained, "coalesced queued activity notifications");
            }
        }
    }

    /// One full evaluation pass: fresh snapshot read, transition check,
    /// cooling derivation, requirement fetch, milestone evaluation, publish.
    async fn evaluate(&mut self, cause: RefreshCause) -> Result<(), EngineError> {
        self.eval_seq += 1;
        let seq = self.eval_seq;

        match self.source.relationship_snapshot(&self.user_id).await {
            Ok(Some(record)) => {
                self.apply_snapshot(seq, record, cause).await;
                Ok(())
            }
            Ok(None) => {
                self.apply_not_found(seq);
                Ok(())
            }
            Err(err) => match cause {
                RefreshCause::Background => {
                    warn!(error = %err, "background refresh failed; keeping last-known-good state");
                    Ok(())
                }
                RefreshCause::Initial | RefreshCause::User => {
                    self.refresh_error = Some(err.to_string());
                    self.publish();
                    Err(EngineError::Source(err))
                }
            },
        }
    }

    async fn apply_snapshot(&mut self, seq: u64, record: RelationshipRecord, cause: RefreshCause) {
        // Last-writer-by-request-time: never let an older pass overwrite a
        // newer application, and never publish after dispose.
        if seq <= self.applied_seq {
            debug!(seq, applied = self.applied_seq, "discarding stale evaluation result");
            return;
        }
        if self.shared.is_disposed() {
            return;
        }

        if self.relationship_id.as_deref() != Some(record.id.as_str()) {
            self.resubscribe(&record.id);
        }

        match stages::transition(self.prev_stage, record.current_stage) {
            StageTransition::Advanced { from, to } => {
                info!(from = %from, to = %to, "stage advanced");
                self.shared.intents().stage_completed = Some(from);
                // Eagerly pull the finished stage's list for the celebration
                // detail; the projection still publishes if this fails.
                match self.source.requirements(&record.id, from).await {
                    Ok(requirements) => {
                        self.selected_detail = Some(StageDetail::Completed {
                            stage: from,
                            requirements,
                        });
                    }
                    Err(err) => {
                        warn!(error = %err, "could not fetch completed-stage detail")
                    }
                }
            }
            StageTransition::Reverted { from, to } => {
                warn!(from = %from, to = %to, "stage moved backward; suppressing celebration");
            }
            StageTransition::Initial | StageTransition::Unchanged => {}
        }
        self.prev_stage = Some(record.current_stage);

        match CoolingPeriod::derive(&record, Utc::now(), self.config.cooling_window) {
            Some(period) => {
                let same_target = self.countdown.map(|c| c.ends_at) == Some(period.ends_at);
                if !same_target {
                    self.countdown = Some(Countdown::new(&period));
                    self.shared.intents().cooling_period = true;
                    info!(ends_at = %period.ends_at, remaining = period.remaining_secs,
                        "cooling-off countdown started");
                }
            }
            None => {
                if self.countdown.take().is_some() {
                    debug!("cooling flags cleared by snapshot; countdown stopped");
                }
            }
        }

        match self
            .source
            .requirements(&record.id, record.current_stage)
            .await
        {
            Ok(requirements) => self.requirements = requirements,
            Err(err) => {
                warn!(error = %err, "requirement fetch failed; keeping previous list")
            }
        }

        let days = progress::days_together(record.created_at, Utc::now());
        let outcome = self
            .milestones
            .evaluate(days, record.metrics.video_call_count);
        if let Some(achievement) = outcome.celebration() {
            info!(title = %achievement.title, "milestone reached");
            self.shared.intents().milestone = Some(achievement.clone());
        }
        self.achievements = outcome.achievements;
        self.reached_milestone = outcome.reached;

        self.record = Some(record);
        self.loaded = true;
        self.refresh_error = None;
        self.applied_seq = seq;
        self.publish();
        debug!(?cause, revision = self.revision, "evaluation pass applied");
    }

    fn apply_not_found(&mut self, seq: u64) {
        if seq <= self.applied_seq || self.shared.is_disposed() {
            return;
        }
        debug!(user = %self.user_id, "no active relationship");
        self.unsubscribe_feeds();
        self.relationship_id = None;
        self.record = None;
        self.requirements.clear();
        self.achievements.clear();
        self.reached_milestone = None;
        self.selected_detail = None;
        self.prev_stage = None;
        self.countdown = None;
        self.loaded = true;
        self.refresh_error = None;
        self.applied_seq = seq;
        self.publish();
    }

    /// Activity-changed handler: refresh only the current stage's list and
    /// the percentage. Stage transitions are not re-evaluated here.
    async fn refresh_requirements(&mut self) {
        let Some(record) = self.record.clone() else {
            // No snapshot yet -- fall back to a full background pass.
            let _ = self.evaluate(RefreshCause::Background).await;
            return;
        };
        match self
            .source
            .requirements(&record.id, record.current_stage)
            .await
        {
            Ok(requirements) => {
                self.requirements = requirements;
                self.publish();
            }
            Err(err) => {
                warn!(error = %err, "activity refresh failed; keeping last-known-good list")
            }
        }
    }

    fn on_tick(&mut self) {
        let Some(countdown) = self.countdown.as_mut() else {
            return;
        };
        countdown.tick();
        if !countdown.ticking() {
            debug!("cooling countdown reached zero; local ticking stops");
        }
        self.publish();
    }

    async fn select_stage(&mut self, target: Stage, force: bool) -> Result<(), EngineError> {
        let Some(record) = self.record.clone() else {
            return Err(EngineError::NoRelationship {
                user_id: self.user_id.clone(),
            });
        };
        let click = stages::handle_stage_click(
            target,
            record.current_stage,
            self.selected_detail.is_some(),
            force,
        );
        match click {
            StageClick::Ignored => return Ok(()),
            StageClick::CloseDetail => self.selected_detail = None,
            StageClick::OpenCurrent => {
                self.selected_detail = Some(StageDetail::Current {
                    stage: record.current_stage,
                });
            }
            StageClick::CompletedDetail { stage } => {
                let requirements = self.source.requirements(&record.id, stage).await?;
                self.selected_detail = Some(StageDetail::Completed {
                    stage,
                    requirements,
                });
            }
            StageClick::LockedPreview {
                stage,
                with_requirements,
            } => {
                let requirements: Vec<RequirementPreview> = if with_requirements {
                    self.source
                        .requirements(&record.id, stage)
                        .await?
                        .iter()
                        .map(RequirementPreview::from)
                        .collect()
                } else {
                    Vec::new()
                };
                self.selected_detail = Some(StageDetail::Locked {
                    stage,
                    unlock_message: stages::unlock_message(stage, record.current_stage),
                    requirements,
                });
            }
        }
        self.publish();
        Ok(())
    }

    async fn submit_withdrawal(&mut self, reason: &str) -> Result<(), EngineError> {
        let Some(record) = self.record.clone() else {
            return Err(EngineError::NoRelationship {
                user_id: self.user_id.clone(),
            });
        };
        self.source
            .request_withdrawal(&record.id, &self.user_id, reason)
            .await?;
        // Re-read immediately; the change notification usually arrives too,
        // and both paths converge on the same idempotent evaluation.
        self.evaluate(RefreshCause::User).await
    }

    fn resubscribe(&mut self, relationship_id: &str) {
        self.unsubscribe_feeds();
        self.rel_feed = Some(self.source.subscribe_relationship(relationship_id));
        self.act_feed = Some(self.source.subscribe_activities(relationship_id));
        self.relationship_id = Some(relationship_id.to_string());
        debug!(relationship = relationship_id, "change feeds subscribed");
    }

    fn unsubscribe_feeds(&mut self) {
        if let Some(feed) = self.rel_feed.take() {
            feed.cancel();
        }
        if let Some(feed) = self.act_feed.take() {
            feed.cancel();
        }
    }

    /// Replace the published projection in one step.
    fn publish(&mut self) {
        if self.shared.is_disposed() {
            debug!("skipping publish after dispose");
            return;
        }
        self.revision += 1;
        let state = match (&self.record, self.loaded) {
            (Some(record), _) => ViewState::Ready(self.build_view(record)),
            (None, true) => ViewState::NoRelationship,
            (None, false) => ViewState::Loading,
        };
        let projection = Projection {
            state,
            refresh_error: self.refresh_error.clone(),
            revision: self.revision,
            generated_at: Utc::now(),
        };
        *self
            .shared
            .projection
            .lock()
            .expect("projection lock poisoned") = projection;
    }

    fn build_view(&self, record: &RelationshipRecord) -> ProgressView {
        let cooling = self
            .countdown
            .map(|c| CoolingStatus::new(c.ends_at, c.remaining_secs, c.lapsed));
        ProgressView {
            relationship_id: record.id.clone(),
            status: record.status,
            current_stage: record.current_stage,
            stages: stages::classify(record.current_stage),
            progress_pct: progress::completion_pct(&self.requirements),
            days_together: progress::days_together(record.created_at, Utc::now()),
            requirements: self.requirements.clone(),
            metrics: record.metrics.clone(),
            achievements: self.achievements.clone(),
            reached_milestone: self.reached_milestone,
            cooling,
            selected_detail: self.selected_detail.clone(),
        }
    }

    fn teardown(&mut self) {
        self.unsubscribe_feeds();
        self.countdown = None;
        self.shared.disposed.store(true, Ordering::SeqCst);
        debug!("engine disposed; feeds cancelled and countdown stopped");
    }
}
