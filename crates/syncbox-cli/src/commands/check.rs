use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;

use syncbox_engine::{check_connection, resolve_run_config, RunOptions};
use syncbox_runtime::DockerCli;
use syncbox_types::LogLevel;

#[derive(Debug, Args)]
pub struct CheckArgs {
    /// Run file (YAML or JSON); only its `src` section is used
    #[arg(long, value_name = "FILE")]
    pub config_file: Option<PathBuf>,
    /// Source connector image
    #[arg(long = "src", value_name = "IMAGE")]
    pub source_image: Option<String>,
    /// Connector config override; `--src.key=value` is shorthand for `--set src.key=value`
    #[arg(long = "set", value_name = "ROLE.KEY=VALUE")]
    pub overrides: Vec<String>,
    /// Name used for generated files
    #[arg(long)]
    pub connection_name: Option<String>,
    /// Use the local source image without pulling
    #[arg(long = "no-src-pull")]
    pub no_source_pull: bool,
    /// Keep the workspace after the check
    #[arg(long)]
    pub keep_containers: bool,
    /// Directory for the per-run workspace (default: system temp dir)
    #[arg(long, value_name = "DIR")]
    pub workspace_root: Option<PathBuf>,
}

/// Execute the `check` command: verify the source connection.
pub async fn execute(args: CheckArgs, log_level: LogLevel) -> Result<()> {
    let work_dir = std::env::current_dir().context("Failed to resolve working directory")?;
    let options = RunOptions {
        config_file: args.config_file,
        source_image: args.source_image,
        overrides: args.overrides,
        connection_name: args.connection_name,
        no_source_pull: args.no_source_pull,
        keep_containers: args.keep_containers,
        workspace_root: args.workspace_root,
        source_only: true,
        log_level,
        ..RunOptions::default()
    };
    let config = resolve_run_config(&options, &work_dir)?;

    let report = check_connection(Arc::new(DockerCli::new()), &config).await?;

    println!("Connection check passed for '{}'.", report.image);
    if let Some(message) = &report.message {
        println!("  Message:  {message}");
    }
    println!("  Duration: {:.2}s", report.duration_secs);
    Ok(())
}
