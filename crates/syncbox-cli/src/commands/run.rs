use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;

use syncbox_engine::{resolve_run_config, Orchestrator, RunOptions, RunSummary};
use syncbox_runtime::DockerCli;
use syncbox_types::LogLevel;

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Run file (YAML or JSON) with `src` and `dst` connector sections
    #[arg(long, value_name = "FILE")]
    pub config_file: Option<PathBuf>,
    /// Source connector image
    #[arg(long = "src", value_name = "IMAGE")]
    pub source_image: Option<String>,
    /// Destination connector image
    #[arg(long = "dst", value_name = "IMAGE")]
    pub destination_image: Option<String>,
    /// Connector config override; `--src.key=value` is shorthand for `--set src.key=value`
    #[arg(long = "set", value_name = "ROLE.KEY=VALUE")]
    pub overrides: Vec<String>,
    /// Ignore and keep the prior state file
    #[arg(long)]
    pub full_refresh: bool,
    /// Forward every source line verbatim
    #[arg(long)]
    pub raw_messages: bool,
    /// State file (default: `<connection-name>_state.json` or `state.json`)
    #[arg(long, value_name = "PATH")]
    pub state_file: Option<PathBuf>,
    /// Name used for generated files and the default state file
    #[arg(long)]
    pub connection_name: Option<String>,
    /// Run only the source, printing its output to the terminal
    #[arg(long = "src-only")]
    pub source_only: bool,
    /// Run only the source, writing its output to a file
    #[arg(long = "src-output-file", value_name = "PATH")]
    pub source_output_file: Option<PathBuf>,
    /// Run only the destination, fed from a previously captured file
    #[arg(long = "dst-only", value_name = "INPUT_FILE")]
    pub destination_only_input: Option<PathBuf>,
    /// Verify the source connection before reading
    #[arg(long)]
    pub check_connection: bool,
    /// Use the local source image without pulling
    #[arg(long = "no-src-pull")]
    pub no_source_pull: bool,
    /// Use the local destination image without pulling
    #[arg(long = "no-dst-pull")]
    pub no_destination_pull: bool,
    /// Run the destination on the host network
    #[arg(long = "dst-use-host-network")]
    pub destination_host_network: bool,
    /// Prefix added to the stream name of every record sent to the destination
    #[arg(long = "dst-stream-prefix", value_name = "PREFIX")]
    pub destination_stream_prefix: Option<String>,
    /// Memory limit per connector, in MiB
    #[arg(long = "max-memory", value_name = "MB")]
    pub max_memory_mb: Option<u64>,
    /// CPU limit per connector, in cores
    #[arg(long, value_name = "N")]
    pub max_cpus: Option<f64>,
    /// Container log rotation size (e.g. 10m)
    #[arg(long, value_name = "SIZE")]
    pub max_log_size: Option<String>,
    /// Keep containers and the workspace after the run
    #[arg(long)]
    pub keep_containers: bool,
    /// Pipe source output into the destination while the source runs
    #[arg(long)]
    pub stream_handoff: bool,
    /// Directory for the per-run workspace (default: system temp dir)
    #[arg(long, value_name = "DIR")]
    pub workspace_root: Option<PathBuf>,
}

impl RunArgs {
    fn into_options(self, log_level: LogLevel) -> RunOptions {
        RunOptions {
            config_file: self.config_file,
            source_image: self.source_image,
            destination_image: self.destination_image,
            overrides: self.overrides,
            full_refresh: self.full_refresh,
            raw_messages: self.raw_messages,
            state_file: self.state_file,
            connection_name: self.connection_name,
            source_only: self.source_only,
            source_output_file: self.source_output_file,
            destination_only_input: self.destination_only_input,
            check_connection: self.check_connection,
            no_source_pull: self.no_source_pull,
            no_destination_pull: self.no_destination_pull,
            destination_host_network: self.destination_host_network,
            destination_stream_prefix: self.destination_stream_prefix,
            max_memory_mb: self.max_memory_mb,
            max_cpus: self.max_cpus,
            max_log_size: self.max_log_size,
            keep_containers: self.keep_containers,
            stream_handoff: self.stream_handoff,
            log_level,
            workspace_root: self.workspace_root,
        }
    }
}

/// Execute the `run` command: resolve options, run the sync, print a report.
pub async fn execute(args: RunArgs, log_level: LogLevel) -> Result<()> {
    let work_dir = std::env::current_dir().context("Failed to resolve working directory")?;
    let config = resolve_run_config(&args.into_options(log_level), &work_dir)?;

    tracing::info!(
        mode = config.mode.as_str(),
        source = config.source.image,
        destination = config.destination.image,
        state_file = %config.state_file.display(),
        "Run configuration resolved"
    );

    let state_file = config.state_file.clone();
    let summary = Orchestrator::new(Arc::new(DockerCli::new()), config)
        .run()
        .await?;
    print_report(&summary, &state_file);
    Ok(())
}

// Written to stderr: stdout may be carrying source output.
fn print_report(summary: &RunSummary, state_file: &std::path::Path) {
    eprintln!("Sync completed ({}).", summary.mode);
    eprintln!("  Records forwarded: {}", summary.records_forwarded);
    eprintln!("  States captured:   {}", summary.states_captured);
    if summary.lines_dropped > 0 {
        eprintln!("  Lines dropped:     {}", summary.lines_dropped);
    }
    if summary.state_persisted {
        eprintln!("  State file:        {} (updated)", state_file.display());
    } else {
        eprintln!("  State file:        unchanged");
    }
    eprintln!("  Duration:          {:.2}s", summary.duration_secs);
    for warning in &summary.warnings {
        eprintln!("  Warning: {warning}");
    }
}
