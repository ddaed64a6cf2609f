//! Shared helpers for command implementations.

use std::sync::Arc;

use kindred_core::{
    ProgressionEngine, Projection, RelationshipSource, StageDetail, ViewState,
};

use crate::config::Config;
use crate::store::LocalStore;

pub type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Single-threaded runtime for commands that need async.
pub fn runtime() -> Result<tokio::runtime::Runtime, Box<dyn std::error::Error>> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?)
}

pub fn open_store(config: &Config) -> Result<Arc<LocalStore>, Box<dyn std::error::Error>> {
    Ok(Arc::new(LocalStore::open(config.db_path()?)?))
}

/// Pick the acting user: an explicit `--user`, or the youth of the seeded
/// pair.
pub fn resolve_user(
    store: &LocalStore,
    explicit: Option<String>,
) -> Result<String, Box<dyn std::error::Error>> {
    if let Some(user) = explicit {
        return Ok(user);
    }
    match store.any_relationship()? {
        Some(record) => Ok(record.youth_id),
        None => Err("no pair found; run `kindred pair init` first".into()),
    }
}

/// Start an engine over the local store and wait for the first load.
pub async fn start_engine(
    store: &Arc<LocalStore>,
    user_id: &str,
    config: &Config,
) -> Result<ProgressionEngine, Box<dyn std::error::Error>> {
    let source: Arc<dyn RelationshipSource> = store.clone();
    let engine = ProgressionEngine::start(source, user_id, config.engine_config());
    engine.refresh().await?;
    Ok(engine)
}

/// Render the projection as a human-readable block.
pub fn print_projection(projection: &Projection) {
    match &projection.state {
        ViewState::Loading => println!("loading..."),
        ViewState::NoRelationship => {
            println!("no active relationship (run `kindred pair init` to seed one)");
        }
        ViewState::Ready(view) => {
            println!("relationship {}", view.relationship_id);
            println!(
                "  status: {} | stage: {} ({}/4) | progress: {}% | together: {} days",
                view.status,
                view.current_stage,
                view.current_stage.order(),
                view.progress_pct,
                view.days_together
            );
            let chips: Vec<String> = view
                .stages
                .iter()
                .map(|s| {
                    let mark = if s.is_completed {
                        "x"
                    } else if s.is_current {
                        ">"
                    } else {
                        " "
                    };
                    format!("[{mark}] {}", s.title)
                })
                .collect();
            println!("  stages: {}", chips.join("  "));
            if !view.requirements.is_empty() {
                println!("  requirements:");
                for req in &view.requirements {
                    let mark = if req.is_completed { "x" } else { " " };
                    println!("    [{mark}] {}  ({})", req.title, &req.id[..8.min(req.id.len())]);
                }
            }
            if !view.achievements.is_empty() {
                let titles: Vec<&str> =
                    view.achievements.iter().map(|a| a.title.as_str()).collect();
                println!("  achievements: {}", titles.join(", "));
            }
            if let Some(cooling) = &view.cooling {
                println!(
                    "  cooling-off: {} remaining (ends {}){}",
                    cooling.remaining_display,
                    cooling.ends_at.format("%Y-%m-%d %H:%M:%S UTC"),
                    if cooling.lapsed { " -- lapsed, awaiting review" } else { "" }
                );
            }
            if let Some(detail) = &view.selected_detail {
                print_detail(detail);
            }
        }
    }
    if let Some(error) = &projection.refresh_error {
        println!("  last refresh failed: {error} (retry with `kindred status`)");
    }
}

pub fn print_detail(detail: &StageDetail) {
    match detail {
        StageDetail::Current { stage } => println!("  viewing current stage: {stage}"),
        StageDetail::Completed {
            stage,
            requirements,
        } => {
            println!("  completed stage: {stage}");
            for req in requirements {
                let mark = if req.is_completed { "x" } else { " " };
                println!("    [{mark}] {}", req.title);
            }
        }
        StageDetail::Locked {
            stage,
            unlock_message,
            requirements,
        } => {
            println!("  locked stage: {stage}");
            println!("    {unlock_message}");
            for req in requirements {
                println!("    - {}", req.title);
            }
        }
    }
}
