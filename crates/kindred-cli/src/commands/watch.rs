//! Live view: an engine fed by the store's polling bridge.
//!
//! Run `kindred watch` in one terminal and mutate the pair from another
//! (`kindred activity complete ...`, `kindred pair set-stage ...`); the
//! poller turns those external writes into change notifications and the
//! engine re-derives on each one.

use std::time::Duration;

use clap::Args;

use crate::common::{open_store, resolve_user, runtime, start_engine, CliResult};
use crate::config::Config;

#[derive(Args)]
pub struct WatchArgs {
    /// Act as this participant (defaults to the seeded youth)
    #[arg(long)]
    pub user: Option<String>,
    /// Store poll interval in milliseconds
    #[arg(long, default_value_t = 500)]
    pub poll_ms: u64,
}

pub fn run(args: WatchArgs) -> CliResult {
    let config = Config::load()?;
    runtime()?.block_on(async {
        let store = open_store(&config)?;
        let user = resolve_user(&store, args.user)?;
        let poller = store
            .clone()
            .spawn_poller(Duration::from_millis(args.poll_ms.max(100)));
        let engine = start_engine(&store, &user, &config).await?;

        println!("watching as '{user}' (ctrl-c to stop)");
        let mut last_revision = 0u64;
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                _ = tokio::time::sleep(Duration::from_millis(250)) => {
                    let projection = engine.projection();
                    if projection.revision != last_revision {
                        last_revision = projection.revision;
                        print_line(&projection);
                    }
                    if let Some(stage) = engine.take_stage_completed() {
                        println!("  ** stage completed: {stage} -- celebration due");
                    }
                    if let Some(achievement) = engine.take_milestone() {
                        println!("  ** milestone reached: {}", achievement.title);
                    }
                    if engine.take_cooling_period() {
                        println!("  ** cooling-off period started");
                    }
                }
            }
        }

        poller.abort();
        engine.dispose().await;
        println!("stopped");
        Ok(())
    })
}

fn print_line(projection: &kindred_core::Projection) {
    match projection.view() {
        Some(view) => {
            let cooling = view
                .cooling
                .as_ref()
                .map(|c| format!(" | cooling {}", c.remaining_display))
                .unwrap_or_default();
            println!(
                "[rev {:>4}] {} | {} | {}%{cooling}",
                projection.revision, view.status, view.current_stage, view.progress_pct
            );
        }
        None => println!("[rev {:>4}] no active relationship", projection.revision),
    }
}
