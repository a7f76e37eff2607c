mod args;
mod commands;
mod logging;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use syncbox_engine::SyncError;
use syncbox_types::LogLevel;

use crate::commands::check::CheckArgs;
use crate::commands::run::RunArgs;

#[derive(Parser)]
#[command(
    name = "syncbox",
    version,
    about = "Run containerized source and destination connectors locally"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace); also passed to connectors
    #[arg(long, default_value = "info", global = true)]
    log_level: LogLevel,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a sync: source into destination, or one side on its own
    Run(RunArgs),
    /// Verify the source connector can connect with its config
    Check(CheckArgs),
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => commands::run::execute(args, cli.log_level).await,
        Commands::Check(args) => commands::check::execute(args, cli.log_level).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_from(args::expand_connector_flags(std::env::args_os()));

    logging::init(cli.log_level);

    match dispatch(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            let code = e.downcast_ref::<SyncError>().map_or(1, SyncError::exit_code);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}
