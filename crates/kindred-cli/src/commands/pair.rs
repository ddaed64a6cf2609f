//! Pair seeding and policy-layer simulation.
//!
//! These commands mutate the store directly, standing in for the external
//! policy layer (reviewers, scheduled jobs). The engine only ever observes
//! the results through snapshots and change notifications.

use chrono::{Duration, Utc};
use clap::Subcommand;
use kindred_core::{RelationshipRecord, Requirement, Stage};

use crate::common::CliResult;
use crate::config::Config;
use crate::store::LocalStore;

#[derive(Subcommand)]
pub enum PairAction {
    /// Create a demo youth/elder pair with stock requirements
    Init {
        /// Youth participant id
        #[arg(long, default_value = "youth-1")]
        youth: String,
        /// Elder participant id
        #[arg(long, default_value = "elder-1")]
        elder: String,
        /// Backdate the match by this many days (exercises milestones)
        #[arg(long, default_value_t = 0)]
        days: i64,
        /// Starting stage
        #[arg(long)]
        stage: Option<Stage>,
    },
    /// Print the raw relationship record
    Show,
    /// Move the pair to a stage (reviewer decision)
    SetStage { stage: Stage },
    /// Bump interaction metrics
    Bump {
        #[arg(long, default_value_t = 0)]
        messages: u32,
        #[arg(long, default_value_t = 0)]
        video_calls: u32,
        #[arg(long, default_value_t = 0)]
        meetings: u32,
        #[arg(long, default_value_t = 0)]
        active_days: u32,
    },
}

/// Stock requirement sets seeded per stage.
fn stock_requirements(relationship_id: &str) -> Vec<Requirement> {
    let stock: [(Stage, &[&str]); 4] = [
        (
            Stage::GettingToKnow,
            &[
                "Exchange self introductions",
                "Chat on five separate days",
                "Complete a voice call",
            ],
        ),
        (
            Stage::TrialPeriod,
            &[
                "Hold a weekly video call",
                "Plan a shared activity",
                "Record a shared memory",
            ],
        ),
        (
            Stage::OfficialCeremony,
            &[
                "Both sign the companionship agreement",
                "Hold the ceremony video call",
            ],
        ),
        (
            Stage::FamilyLife,
            &["Check in every week", "Celebrate a festival together"],
        ),
    ];

    stock.iter()
        .flat_map(|(stage, titles)| {
            titles
                .iter()
                .map(|title| Requirement::new(relationship_id, *stage, *title))
        })
        .collect()
}

pub fn run(action: PairAction) -> CliResult {
    let config = Config::load()?;
    let store = LocalStore::open(config.db_path()?)?;

    match action {
        PairAction::Init {
            youth,
            elder,
            days,
            stage,
        } => {
            let mut record = RelationshipRecord::new(&youth, &elder);
            if days > 0 {
                record.created_at = Utc::now() - Duration::days(days);
                record.stage_start_date = record.created_at;
            }
            if let Some(stage) = stage {
                record.current_stage = stage;
            }
            let requirements = stock_requirements(&record.id);
            store.seed(&record, &requirements)?;
            println!(
                "seeded pair {} ({} + {}) at stage '{}', matched {} days ago",
                record.id,
                youth,
                elder,
                record.current_stage,
                days
            );
        }
        PairAction::Show => match store.any_relationship()? {
            Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
            None => println!("no pair seeded"),
        },
        PairAction::SetStage { stage } => {
            let record = store
                .any_relationship()?
                .ok_or("no pair seeded; run `kindred pair init` first")?;
            store.set_stage(&record.id, stage)?;
            println!("moved {} to stage '{stage}'", record.id);
        }
        PairAction::Bump {
            messages,
            video_calls,
            meetings,
            active_days,
        } => {
            let record = store
                .any_relationship()?
                .ok_or("no pair seeded; run `kindred pair init` first")?;
            store.bump_metrics(&record.id, messages, video_calls, meetings, active_days)?;
            println!("metrics updated for {}", record.id);
        }
    }
    Ok(())
}
