//! Withdrawal requests and the cooling-off window.

use clap::Subcommand;

use crate::common::{open_store, print_projection, resolve_user, runtime, start_engine, CliResult};
use crate::config::Config;

#[derive(Subcommand)]
pub enum WithdrawAction {
    /// File a withdrawal request through the engine
    Request {
        #[arg(long)]
        reason: String,
        /// Acting participant (defaults to the seeded youth)
        #[arg(long)]
        by: Option<String>,
    },
    /// Show cooling-off state
    Status {
        #[arg(long)]
        user: Option<String>,
    },
    /// Close out a pending request (reviewer decision)
    Resolve {
        /// Approve ends the relationship; otherwise it reactivates
        #[arg(long)]
        approve: bool,
    },
}

pub fn run(action: WithdrawAction) -> CliResult {
    let config = Config::load()?;
    runtime()?.block_on(async {
        let store = open_store(&config)?;
        match action {
            WithdrawAction::Request { reason, by } => {
                let user = resolve_user(&store, by)?;
                let engine = start_engine(&store, &user, &config).await?;
                engine.submit_withdrawal(&reason).await?;
                let projection = engine.projection();
                if let Some(cooling) = projection.view().and_then(|v| v.cooling.as_ref()) {
                    println!(
                        "withdrawal filed; cooling-off ends in {} (at {})",
                        cooling.remaining_display,
                        cooling.ends_at.format("%Y-%m-%d %H:%M:%S UTC")
                    );
                }
                engine.dispose().await;
            }
            WithdrawAction::Status { user } => {
                let user = resolve_user(&store, user)?;
                let engine = start_engine(&store, &user, &config).await?;
                let projection = engine.projection();
                match projection.view().and_then(|v| v.cooling.clone()) {
                    Some(cooling) => {
                        println!(
                            "in cooling-off: {} remaining{}",
                            cooling.remaining_display,
                            if cooling.lapsed { " (lapsed, awaiting review)" } else { "" }
                        );
                    }
                    None => {
                        print_projection(&projection);
                        println!("no cooling-off window active");
                    }
                }
                engine.dispose().await;
            }
            WithdrawAction::Resolve { approve } => {
                let record = store
                    .any_relationship()?
                    .ok_or("no pair seeded; run `kindred pair init` first")?;
                store.resolve_withdrawal(&record.id, approve)?;
                println!(
                    "withdrawal {}",
                    if approve {
                        "approved; relationship ended"
                    } else {
                        "rejected; relationship reactivated"
                    }
                );
            }
        }
        Ok(())
    })
}
