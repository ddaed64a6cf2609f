//! Stage overview and tap simulation.

use clap::Subcommand;
use kindred_core::Stage;

use crate::common::{open_store, print_detail, resolve_user, runtime, start_engine, CliResult};
use crate::config::Config;

#[derive(Subcommand)]
pub enum StagesAction {
    /// Show every stage with its current/completed/locked classification
    List {
        #[arg(long)]
        user: Option<String>,
    },
    /// Simulate tapping a stage chip; prints the resulting detail view
    Select {
        stage: Stage,
        /// Open the current stage even when no detail is showing
        #[arg(long)]
        force: bool,
        #[arg(long)]
        user: Option<String>,
    },
}

pub fn run(action: StagesAction) -> CliResult {
    let config = Config::load()?;
    runtime()?.block_on(async {
        let store = open_store(&config)?;
        match action {
            StagesAction::List { user } => {
                let user = resolve_user(&store, user)?;
                let engine = start_engine(&store, &user, &config).await?;
                let projection = engine.projection();
                match projection.view() {
                    Some(view) => {
                        for info in &view.stages {
                            let state = if info.is_current {
                                "current"
                            } else if info.is_completed {
                                "completed"
                            } else {
                                "locked"
                            };
                            println!("{}. {:<18} {state}", info.order, info.title);
                        }
                    }
                    None => println!("no active relationship"),
                }
                engine.dispose().await;
            }
            StagesAction::Select { stage, force, user } => {
                let user = resolve_user(&store, user)?;
                let engine = start_engine(&store, &user, &config).await?;
                engine.select_stage(stage, force).await?;
                match engine.projection().view().and_then(|v| v.selected_detail.clone()) {
                    Some(detail) => print_detail(&detail),
                    None => println!("nothing to show for '{stage}'"),
                }
                engine.dispose().await;
            }
        }
        Ok(())
    })
}
