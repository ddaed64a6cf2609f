//! Derived progression status: one engine evaluation pass, printed.

use clap::Args;

use crate::common::{open_store, print_projection, resolve_user, runtime, start_engine, CliResult};
use crate::config::Config;

#[derive(Args)]
pub struct StatusArgs {
    /// Act as this participant (defaults to the seeded youth)
    #[arg(long)]
    pub user: Option<String>,
    /// Print the raw projection as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: StatusArgs) -> CliResult {
    let config = Config::load()?;
    runtime()?.block_on(async {
        let store = open_store(&config)?;
        let user = resolve_user(&store, args.user)?;
        let engine = start_engine(&store, &user, &config).await?;
        let projection = engine.projection();
        if args.json {
            println!("{}", serde_json::to_string_pretty(&projection)?);
        } else {
            print_projection(&projection);
        }
        engine.dispose().await;
        Ok(())
    })
}
