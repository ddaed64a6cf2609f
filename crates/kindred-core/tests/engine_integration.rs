//! Integration tests for the progression engine.
//!
//! Drives a real engine against the in-memory source: initial load,
//! notification-triggered re-evaluation, intent one-shots, cooling
//! countdown, outage handling, and disposal.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as Span, Utc};
use kindred_core::{
    EndRequestStatus, EngineConfig, EngineError, MemorySource, ProgressionEngine, Projection,
    RelationshipRecord, RelationshipStatus, Requirement, Stage, StageDetail, ViewState,
};

fn record_at(stage: Stage, days_ago: i64) -> RelationshipRecord {
    let mut record = RelationshipRecord::new("youth-1", "elder-1");
    record.current_stage = stage;
    record.created_at = Utc::now() - Span::days(days_ago);
    record.stage_start_date = Utc::now() - Span::days(days_ago.min(3));
    record
}

fn requirements(record: &RelationshipRecord, stage: Stage, done: &[bool]) -> Vec<Requirement> {
    done.iter()
        .enumerate()
        .map(|(i, &completed)| {
            let mut req = Requirement::new(&record.id, stage, format!("task {}", i + 1));
            req.is_completed = completed;
            req
        })
        .collect()
}

fn start_engine(source: &Arc<MemorySource>, config: EngineConfig) -> ProgressionEngine {
    let source: Arc<dyn kindred_core::RelationshipSource> = source.clone();
    ProgressionEngine::start(source, "youth-1", config)
}

async fn wait_for(
    engine: &ProgressionEngine,
    what: &str,
    pred: impl Fn(&Projection) -> bool,
) -> Projection {
    for _ in 0..500 {
        let projection = engine.projection();
        if pred(&projection) {
            return projection;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

fn is_ready(projection: &Projection) -> bool {
    projection.view().is_some()
}

#[tokio::test]
async fn initial_load_publishes_a_full_view() {
    let source = Arc::new(MemorySource::new());
    let record = record_at(Stage::TrialPeriod, 3);
    let reqs = requirements(&record, Stage::TrialPeriod, &[true, true, false]);
    source.seed(record.clone(), reqs);

    let engine = start_engine(&source, EngineConfig::default());
    let projection = wait_for(&engine, "initial load", is_ready).await;

    let view = projection.view().unwrap();
    assert_eq!(view.relationship_id, record.id);
    assert_eq!(view.current_stage, Stage::TrialPeriod);
    assert_eq!(view.progress_pct, 67);
    assert_eq!(view.days_together, 3);
    assert_eq!(view.stages.len(), 4);
    assert!(view.stages[0].is_completed);
    assert!(view.stages[1].is_current);
    assert!(view.stages[2].is_locked() && view.stages[3].is_locked());
    assert!(view.cooling.is_none());

    engine.dispose().await;
}

#[tokio::test]
async fn missing_relationship_is_a_recoverable_state() {
    let source = Arc::new(MemorySource::new());
    let engine = start_engine(&source, EngineConfig::default());

    let projection = wait_for(&engine, "no-relationship state", |p| {
        matches!(p.state, ViewState::NoRelationship)
    })
    .await;
    assert!(projection.refresh_error.is_none());

    // A later refresh is an ordinary retry, not an error.
    engine.refresh().await.unwrap();
    assert!(matches!(
        engine.projection().state,
        ViewState::NoRelationship
    ));

    engine.dispose().await;
}

#[tokio::test]
async fn forward_transition_fires_stage_completed_once() {
    let source = Arc::new(MemorySource::new());
    let record = record_at(Stage::TrialPeriod, 3);
    let mut reqs = requirements(&record, Stage::TrialPeriod, &[true, true]);
    reqs.extend(requirements(&record, Stage::OfficialCeremony, &[false]));
    source.seed(record, reqs);

    let engine = start_engine(&source, EngineConfig::default());
    wait_for(&engine, "initial load", is_ready).await;
    assert_eq!(engine.take_stage_completed(), None, "first sync never celebrates");

    source.update_relationship(|r| {
        r.current_stage = Stage::OfficialCeremony;
        r.stage_start_date = Utc::now();
    });

    let projection = wait_for(&engine, "stage advance", |p| {
        p.view().is_some_and(|v| v.current_stage == Stage::OfficialCeremony)
    })
    .await;

    assert_eq!(engine.take_stage_completed(), Some(Stage::TrialPeriod));
    assert_eq!(engine.take_stage_completed(), None, "intent is one-shot");

    // The celebration detail was eagerly computed for the finished stage.
    let view = projection.view().unwrap();
    match &view.selected_detail {
        Some(StageDetail::Completed { stage, requirements }) => {
            assert_eq!(*stage, Stage::TrialPeriod);
            assert_eq!(requirements.len(), 2);
        }
        other => panic!("expected completed detail, got {other:?}"),
    }

    // Duplicate notification: no change, no second celebration.
    let revision = projection.revision;
    source.notify_relationship(&view.relationship_id);
    wait_for(&engine, "duplicate event processed", |p| p.revision > revision).await;
    assert_eq!(engine.take_stage_completed(), None);

    engine.dispose().await;
}

#[tokio::test]
async fn backward_transition_never_celebrates() {
    let source = Arc::new(MemorySource::new());
    let record = record_at(Stage::OfficialCeremony, 10);
    source.seed(record, Vec::new());

    let engine = start_engine(&source, EngineConfig::default());
    wait_for(&engine, "initial load", is_ready).await;

    source.update_relationship(|r| r.current_stage = Stage::TrialPeriod);
    wait_for(&engine, "stage reverted", |p| {
        p.view().is_some_and(|v| v.current_stage == Stage::TrialPeriod)
    })
    .await;

    assert_eq!(engine.take_stage_completed(), None);

    engine.dispose().await;
}

#[tokio::test]
async fn metrics_only_change_recomputes_without_intents() {
    let source = Arc::new(MemorySource::new());
    let record = record_at(Stage::TrialPeriod, 2);
    let reqs = requirements(&record, Stage::TrialPeriod, &[true, false]);
    source.seed(record, reqs);

    let engine = start_engine(&source, EngineConfig::default());
    let before = wait_for(&engine, "initial load", is_ready).await;
    engine.take_stage_completed();
    engine.take_milestone();
    engine.take_cooling_period();

    source.update_relationship(|r| r.metrics.message_count = 42);
    let after = wait_for(&engine, "metrics refresh", |p| p.revision > before.revision).await;

    let view = after.view().unwrap();
    assert_eq!(view.metrics.message_count, 42);
    assert_eq!(view.progress_pct, 50);
    assert_eq!(view.current_stage, Stage::TrialPeriod);
    assert_eq!(engine.take_stage_completed(), None);
    assert_eq!(engine.take_milestone(), None);
    assert!(!engine.take_cooling_period());

    engine.dispose().await;
}

#[tokio::test]
async fn activity_event_refreshes_only_the_requirement_list() {
    let source = Arc::new(MemorySource::new());
    let record = record_at(Stage::TrialPeriod, 2);
    let reqs = requirements(&record, Stage::TrialPeriod, &[true, true, false]);
    let target_id = reqs[2].id.clone();
    source.seed(record, reqs);

    let engine = start_engine(&source, EngineConfig::default());
    let before = wait_for(&engine, "initial load", is_ready).await;
    assert_eq!(before.view().unwrap().progress_pct, 67);

    source.complete_requirement(&target_id);

    let after = wait_for(&engine, "progress update", |p| {
        p.view().is_some_and(|v| v.progress_pct == 100)
    })
    .await;
    assert!(after.view().unwrap().requirements.iter().all(|r| r.is_completed));
    assert_eq!(engine.take_stage_completed(), None);

    engine.dispose().await;
}

#[tokio::test]
async fn milestone_fires_once_per_session() {
    let source = Arc::new(MemorySource::new());
    let record = record_at(Stage::FamilyLife, 30);
    source.seed(record.clone(), Vec::new());

    let engine = start_engine(&source, EngineConfig::default());
    let projection = wait_for(&engine, "initial load", is_ready).await;

    let view = projection.view().unwrap();
    assert_eq!(view.reached_milestone, Some(30));
    let titles: Vec<&str> = view.achievements.iter().map(|a| a.title.as_str()).collect();
    assert!(titles.contains(&"First Month"));

    let celebrated = engine.take_milestone().expect("milestone intent");
    assert_eq!(celebrated.title, "First Month");
    assert_eq!(engine.take_milestone(), None);

    // Re-evaluating the same day count must not re-fire.
    engine.refresh().await.unwrap();
    assert_eq!(engine.take_milestone(), None);

    engine.dispose().await;
}

#[tokio::test]
async fn withdrawal_starts_cooling_with_one_intent() {
    let source = Arc::new(MemorySource::new());
    let record = record_at(Stage::TrialPeriod, 5);
    source.seed(record.clone(), Vec::new());

    let engine = start_engine(&source, EngineConfig::default());
    wait_for(&engine, "initial load", is_ready).await;
    assert!(!engine.take_cooling_period());

    engine.submit_withdrawal("needs a break").await.unwrap();

    let projection = engine.projection();
    let view = projection.view().unwrap();
    assert_eq!(view.status, RelationshipStatus::Paused);
    let cooling = view.cooling.as_ref().expect("cooling status");
    assert!(cooling.is_in_cooling_period);
    assert!(!cooling.lapsed);
    assert!((86395..=86400).contains(&cooling.remaining_secs), "got {}", cooling.remaining_secs);
    assert!(engine.take_cooling_period());

    // The duplicate notification re-derives the same target: no new intent,
    // no countdown restart.
    source.notify_relationship(&view.relationship_id);
    wait_for(&engine, "duplicate processed", |p| p.revision > projection.revision).await;
    assert!(!engine.take_cooling_period());

    engine.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn cooling_countdown_ticks_down_locally() {
    let source = Arc::new(MemorySource::new());
    let record = record_at(Stage::TrialPeriod, 5);
    source.seed(record, Vec::new());

    let engine = start_engine(&source, EngineConfig::default());
    wait_for(&engine, "initial load", is_ready).await;
    engine.submit_withdrawal("pause please").await.unwrap();

    let before = engine
        .projection()
        .view()
        .and_then(|v| v.cooling.as_ref().map(|c| c.remaining_secs))
        .expect("cooling remaining");

    tokio::time::sleep(Duration::from_secs(3)).await;

    let after = wait_for(&engine, "three ticks", |p| {
        p.view()
            .and_then(|v| v.cooling.as_ref().map(|c| c.remaining_secs))
            .is_some_and(|secs| secs <= before - 3)
    })
    .await;
    let cooling = after.view().unwrap().cooling.clone().unwrap();
    assert!(cooling.remaining_secs >= 0);
    assert!(cooling.is_in_cooling_period);

    engine.dispose().await;
}

#[tokio::test]
async fn stale_cooldown_snapshot_reports_lapsed() {
    let source = Arc::new(MemorySource::new());
    let mut record = record_at(Stage::TrialPeriod, 10);
    record.status = RelationshipStatus::Paused;
    record.end_request_status = EndRequestStatus::PendingCooldown;
    record.end_request_by = Some("elder-1".into());
    record.end_request_at = Some(Utc::now() - Span::hours(30));
    source.seed(record, Vec::new());

    let engine = start_engine(&source, EngineConfig::default());
    let projection = wait_for(&engine, "initial load", is_ready).await;

    let cooling = projection.view().unwrap().cooling.clone().expect("cooling");
    assert_eq!(cooling.remaining_secs, 0);
    assert!(cooling.lapsed);
    // Raw flags still say cooling until the source clears them.
    assert!(cooling.is_in_cooling_period);

    engine.dispose().await;
}

#[tokio::test]
async fn user_refresh_failure_keeps_last_known_good_state() {
    let source = Arc::new(MemorySource::new());
    let record = record_at(Stage::TrialPeriod, 2);
    let reqs = requirements(&record, Stage::TrialPeriod, &[true]);
    source.seed(record.clone(), reqs);

    let engine = start_engine(&source, EngineConfig::default());
    wait_for(&engine, "initial load", is_ready).await;

    source.set_fail_reads(true);
    let err = engine.refresh().await.unwrap_err();
    assert!(matches!(err, EngineError::Source(_)));

    let projection = engine.projection();
    assert!(projection.view().is_some(), "view survives the outage");
    assert!(projection.refresh_error.is_some(), "retryable message surfaced");

    source.set_fail_reads(false);
    engine.refresh().await.unwrap();
    assert!(engine.projection().refresh_error.is_none());

    engine.dispose().await;
}

#[tokio::test]
async fn background_failure_is_swallowed() {
    let source = Arc::new(MemorySource::new());
    let record = record_at(Stage::TrialPeriod, 2);
    source.seed(record.clone(), Vec::new());

    let engine = start_engine(&source, EngineConfig::default());
    let before = wait_for(&engine, "initial load", is_ready).await;

    source.set_fail_reads(true);
    source.notify_relationship(&record.id);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let after = engine.projection();
    assert_eq!(after.revision, before.revision, "failed pass publishes nothing");
    assert!(after.refresh_error.is_none(), "background failures stay quiet");
    assert!(after.view().is_some());

    engine.dispose().await;
}

#[tokio::test]
async fn stage_clicks_drive_the_selected_detail() {
    let source = Arc::new(MemorySource::new());
    let record = record_at(Stage::TrialPeriod, 2);
    let mut reqs = requirements(&record, Stage::GettingToKnow, &[true, true]);
    reqs.extend(requirements(&record, Stage::TrialPeriod, &[false]));
    reqs.extend(requirements(&record, Stage::OfficialCeremony, &[false, false]));
    source.seed(record, reqs);

    let engine = start_engine(&source, EngineConfig::default());
    wait_for(&engine, "initial load", is_ready).await;

    // Completed stage: detail for that stage, not the current one.
    engine.select_stage(Stage::GettingToKnow, false).await.unwrap();
    match engine.projection().view().unwrap().selected_detail.clone() {
        Some(StageDetail::Completed { stage, requirements }) => {
            assert_eq!(stage, Stage::GettingToKnow);
            assert_eq!(requirements.len(), 2);
        }
        other => panic!("expected completed detail, got {other:?}"),
    }

    // Tapping the current stage while a detail is open toggles it closed.
    engine.select_stage(Stage::TrialPeriod, false).await.unwrap();
    assert!(engine.projection().view().unwrap().selected_detail.is_none());

    // Nothing open, not forced: no-op.
    engine.select_stage(Stage::TrialPeriod, false).await.unwrap();
    assert!(engine.projection().view().unwrap().selected_detail.is_none());

    // Forced: current-stage detail opens.
    engine.select_stage(Stage::TrialPeriod, true).await.unwrap();
    assert!(matches!(
        engine.projection().view().unwrap().selected_detail,
        Some(StageDetail::Current { stage: Stage::TrialPeriod })
    ));

    // Next locked stage previews its requirements.
    engine.select_stage(Stage::OfficialCeremony, false).await.unwrap();
    match engine.projection().view().unwrap().selected_detail.clone() {
        Some(StageDetail::Locked { stage, requirements, unlock_message }) => {
            assert_eq!(stage, Stage::OfficialCeremony);
            assert_eq!(requirements.len(), 2);
            assert!(unlock_message.contains("Official Ceremony"));
        }
        other => panic!("expected locked preview, got {other:?}"),
    }

    // Deeper locked stage gets the generic message and no preview list.
    engine.select_stage(Stage::FamilyLife, false).await.unwrap();
    match engine.projection().view().unwrap().selected_detail.clone() {
        Some(StageDetail::Locked { stage, requirements, unlock_message }) => {
            assert_eq!(stage, Stage::FamilyLife);
            assert!(requirements.is_empty());
            assert_eq!(unlock_message, "Complete the previous stages first");
        }
        other => panic!("expected locked preview, got {other:?}"),
    }

    engine.dispose().await;
}

#[tokio::test]
async fn dispose_cancels_both_subscriptions() {
    let source = Arc::new(MemorySource::new());
    let record = record_at(Stage::TrialPeriod, 1);
    source.seed(record, Vec::new());

    let engine = start_engine(&source, EngineConfig::default());
    wait_for(&engine, "initial load", is_ready).await;
    assert_eq!(source.relationship_subscribers(), 1);
    assert_eq!(source.activity_subscribers(), 1);

    engine.dispose().await;
    assert_eq!(source.relationship_subscribers(), 0);
    assert_eq!(source.activity_subscribers(), 0);
}
