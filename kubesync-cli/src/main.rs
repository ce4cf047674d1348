//! kubesync: mirror Kubernetes resources into a hierarchical policy data store.
//!
//! # Usage
//!
//! ```text
//! kubesync run [--config <path>] [--dry-run]
//! kubesync stop
//! kubesync status [--json]
//! kubesync config check [--config <path>] [--json]
//! kubesync config path
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{config::ConfigCommand, daemon::RunArgs, status::StatusArgs};

#[derive(Parser, Debug)]
#[command(
    name = "kubesync",
    version,
    about = "Keep a policy data store in sync with Kubernetes resources",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the sync daemon in the foreground, one worker per resource type.
    Run(RunArgs),

    /// Ask a running daemon to stop every worker and exit.
    Stop,

    /// Show per-worker sync status from a running daemon.
    Status(StatusArgs),

    /// Inspect and validate the daemon configuration.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => args.run(),
        Commands::Stop => commands::daemon::stop(),
        Commands::Status(args) => args.run(),
        Commands::Config { command } => commands::config::run(command),
    }
}
