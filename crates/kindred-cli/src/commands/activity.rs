//! Requirement/activity management against the local store.

use clap::Subcommand;
use kindred_core::{Requirement, Stage};

use crate::common::CliResult;
use crate::config::Config;
use crate::store::{LocalStore, Signer};

#[derive(Subcommand)]
pub enum ActivityAction {
    /// List requirements (all stages, or one)
    List {
        #[arg(long)]
        stage: Option<Stage>,
    },
    /// Add a requirement to a stage (defaults to the current stage)
    Add {
        title: String,
        #[arg(long)]
        stage: Option<Stage>,
        #[arg(long)]
        description: Option<String>,
        /// Numeric goal, e.g. 5 for "chat on 5 separate days"
        #[arg(long)]
        target: Option<u32>,
    },
    /// Mark a requirement completed (id may be abbreviated)
    Complete { id: String },
    /// Sign a dual-signature requirement; completes once both have signed
    Sign {
        id: String,
        #[arg(long, value_enum)]
        by: Signer,
    },
}

pub fn run(action: ActivityAction) -> CliResult {
    let config = Config::load()?;
    let store = LocalStore::open(config.db_path()?)?;
    let record = store
        .any_relationship()?
        .ok_or("no pair seeded; run `kindred pair init` first")?;

    match action {
        ActivityAction::List { stage } => {
            let requirements = match stage {
                Some(stage) => store.fetch_requirements(&record.id, stage)?,
                None => store.all_requirements(&record.id)?,
            };
            if requirements.is_empty() {
                println!("no requirements");
            }
            for req in requirements {
                let mark = if req.is_completed { "x" } else { " " };
                let signatures = match (req.youth_signed, req.elder_signed) {
                    (true, true) => " [signed by both]",
                    (true, false) => " [signed by youth]",
                    (false, true) => " [signed by elder]",
                    (false, false) => "",
                };
                println!(
                    "[{mark}] {:<18} {}  ({}){signatures}",
                    req.stage.to_string(),
                    req.title,
                    &req.id[..8.min(req.id.len())]
                );
            }
        }
        ActivityAction::Add {
            title,
            stage,
            description,
            target,
        } => {
            let stage = stage.unwrap_or(record.current_stage);
            let mut requirement = Requirement::new(&record.id, stage, title);
            if let Some(description) = description {
                requirement.description = description;
            }
            if let Some(target) = target {
                requirement.target_value = Some(target);
                requirement.current_value = Some(0);
            }
            store.add_requirement(&requirement)?;
            println!("added '{}' to stage '{stage}' ({})", requirement.title, requirement.id);
        }
        ActivityAction::Complete { id } => {
            store.complete_requirement(&id)?;
            println!("completed");
        }
        ActivityAction::Sign { id, by } => {
            let requirement = store.sign_requirement(&id, by)?;
            if requirement.is_completed {
                println!("'{}' signed by both participants -- completed", requirement.title);
            } else {
                println!("'{}' signed; waiting for the other participant", requirement.title);
            }
        }
    }
    Ok(())
}
