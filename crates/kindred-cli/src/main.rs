use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod commands;
mod common;
mod config;
mod store;

#[derive(Parser)]
#[command(name = "kindred", version, about = "Kindred companionship progression CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Seed and drive the local demo pair (policy-layer simulation)
    Pair {
        #[command(subcommand)]
        action: commands::pair::PairAction,
    },
    /// Derived progression status
    Status(commands::status::StatusArgs),
    /// Stage overview, taps, and previews
    Stages {
        #[command(subcommand)]
        action: commands::stages::StagesAction,
    },
    /// Requirement/activity management
    Activity {
        #[command(subcommand)]
        action: commands::activity::ActivityAction,
    },
    /// Withdrawal requests and the cooling-off window
    Withdraw {
        #[command(subcommand)]
        action: commands::withdraw::WithdrawAction,
    },
    /// Live view driven by change notifications
    Watch(commands::watch::WatchArgs),
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Pair { action } => commands::pair::run(action),
        Commands::Status(args) => commands::status::run(args),
        Commands::Stages { action } => commands::stages::run(action),
        Commands::Activity { action } => commands::activity::run(action),
        Commands::Withdraw { action } => commands::withdraw::run(action),
        Commands::Watch(args) => commands::watch::run(args),
        Commands::Config { action } => commands::config::run(action),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
