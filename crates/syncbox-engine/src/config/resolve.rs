//! Options bag to [`RunConfig`] resolution.
//!
//! This is the single boundary where operator input becomes a typed run
//! description. Everything past it reads a `RunConfig` and never looks at
//! flags again.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use syncbox_types::{
    ConnectorSpec, HandoffMode, LogLevel, ResourceLimits, Role, RunConfig, RunMode, SourceOutput,
};

use crate::config::parser::{parse_run_file, ByteSizeValue, FileConnector, RunFile};
use crate::error::{Result, SyncError};

/// Raw operator options, as collected by the CLI.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub config_file: Option<PathBuf>,
    pub source_image: Option<String>,
    pub destination_image: Option<String>,
    /// `src.key=value` / `dst.key=value`, in argument order.
    pub overrides: Vec<String>,
    pub full_refresh: bool,
    pub raw_messages: bool,
    pub state_file: Option<PathBuf>,
    pub connection_name: Option<String>,
    pub source_only: bool,
    pub source_output_file: Option<PathBuf>,
    pub destination_only_input: Option<PathBuf>,
    pub check_connection: bool,
    pub no_source_pull: bool,
    pub no_destination_pull: bool,
    pub destination_host_network: bool,
    pub destination_stream_prefix: Option<String>,
    pub max_memory_mb: Option<u64>,
    pub max_cpus: Option<f64>,
    pub max_log_size: Option<String>,
    pub keep_containers: bool,
    pub stream_handoff: bool,
    pub log_level: LogLevel,
    pub workspace_root: Option<PathBuf>,
}

/// One parsed `role.path.to.key=value` override.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyOverride {
    pub role: Role,
    pub path: Vec<String>,
    pub value: serde_json::Value,
}

/// Parse a `src.key=value` override.
///
/// The value is taken as JSON when it parses as JSON, otherwise as a plain
/// string.
///
/// # Errors
///
/// Fails when the `=` is missing, the role prefix is not `src`/`dst`, or a
/// key segment is empty.
pub fn parse_override(raw: &str) -> anyhow::Result<KeyOverride> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("override '{raw}' must have the form src.key=value or dst.key=value");
    };
    let mut segments = key.split('.');
    let role = segments
        .next()
        .and_then(Role::from_short)
        .with_context(|| format!("override '{raw}' must start with 'src.' or 'dst.'"))?;
    let path: Vec<String> = segments.map(str::to_string).collect();
    if path.is_empty() || path.iter().any(String::is_empty) {
        bail!("override '{raw}' has an empty key segment");
    }
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok(KeyOverride { role, path, value })
}

/// Set `path` inside `target`, creating (or replacing non-object)
/// intermediate values with objects.
pub fn apply_override(target: &mut serde_json::Value, path: &[String], value: serde_json::Value) {
    let Some((last, parents)) = path.split_last() else {
        *target = value;
        return;
    };
    let mut cursor = target;
    for segment in parents {
        cursor = object_mut(cursor)
            .entry(segment.clone())
            .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
    }
    object_mut(cursor).insert(last.clone(), value);
}

fn object_mut(value: &mut serde_json::Value) -> &mut serde_json::Map<String, serde_json::Value> {
    if !value.is_object() {
        *value = serde_json::Value::Object(serde_json::Map::new());
    }
    match value {
        serde_json::Value::Object(map) => map,
        _ => unreachable!("value was just replaced with an object"),
    }
}

/// Parse a byte size: plain bytes, or a number with a `k`/`m`/`g` suffix
/// (optionally followed by `b` or `ib`). Units are binary.
///
/// # Errors
///
/// Returns an error for an empty string, an unknown suffix, or overflow.
pub fn parse_byte_size(input: &str) -> anyhow::Result<u64> {
    let trimmed = input.trim().to_ascii_lowercase();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split);
    if digits.is_empty() {
        bail!("invalid byte size '{input}'");
    }
    let number: u64 = digits
        .parse()
        .with_context(|| format!("invalid byte size '{input}'"))?;
    let multiplier: u64 = match unit.trim() {
        "" | "b" => 1,
        "k" | "kb" | "kib" => 1024,
        "m" | "mb" | "mib" => 1024 * 1024,
        "g" | "gb" | "gib" => 1024 * 1024 * 1024,
        other => bail!("invalid byte size '{input}': unknown unit '{other}'"),
    };
    number
        .checked_mul(multiplier)
        .with_context(|| format!("byte size '{input}' is too large"))
}

fn invalid(err: impl std::fmt::Display) -> SyncError {
    SyncError::ConfigInvalid(err.to_string())
}

fn connector_from_file(file: Option<FileConnector>) -> anyhow::Result<ConnectorSpec> {
    let Some(file) = file else {
        return Ok(ConnectorSpec::default());
    };
    let mut limits = ResourceLimits::default();
    if let Some(file_limits) = file.resource_limits {
        limits.max_memory_mb = file_limits.max_memory_mb;
        limits.max_cpus = file_limits.max_cpus;
        match file_limits.max_log_size {
            Some(ByteSizeValue::Bytes(bytes)) => limits.max_log_size_bytes = bytes,
            Some(ByteSizeValue::Text(text)) => limits.max_log_size_bytes = parse_byte_size(&text)?,
            None => {}
        }
    }
    Ok(ConnectorSpec {
        image: file.image,
        config: file
            .config
            .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new())),
        catalog: file.catalog,
        resource_limits: limits,
    })
}

/// Build connector specs from inline images plus ordered overrides.
fn connectors_from_inline(options: &RunOptions) -> anyhow::Result<(ConnectorSpec, ConnectorSpec)> {
    let mut source = ConnectorSpec::new(options.source_image.clone().unwrap_or_default());
    let mut destination =
        ConnectorSpec::new(options.destination_image.clone().unwrap_or_default());
    for raw in &options.overrides {
        let KeyOverride { role, path, value } = parse_override(raw)?;
        let target = match role {
            Role::Source => &mut source.config,
            Role::Destination => &mut destination.config,
        };
        apply_override(target, &path, value);
    }
    Ok((source, destination))
}

fn resolve_mode(options: &RunOptions, work_dir: &Path) -> Result<RunMode> {
    if options.source_only && options.source_output_file.is_some() {
        return Err(invalid(
            "--src-only and --src-output-file are mutually exclusive; the output file already implies a source-only run",
        ));
    }
    let source_only = options.source_only || options.source_output_file.is_some();
    match (source_only, &options.destination_only_input) {
        (true, Some(_)) => Err(invalid(
            "a run cannot be both source-only and destination-only",
        )),
        (true, None) => Ok(RunMode::SourceOnly {
            output: options
                .source_output_file
                .as_ref()
                .map_or(SourceOutput::Stdout, |p| SourceOutput::File(work_dir.join(p))),
        }),
        (false, Some(input)) => Ok(RunMode::DestinationOnly {
            input: work_dir.join(input),
        }),
        (false, None) => Ok(RunMode::Sync),
    }
}

fn apply_limit_flags(options: &RunOptions, spec: &mut ConnectorSpec) -> anyhow::Result<()> {
    if let Some(mb) = options.max_memory_mb {
        spec.resource_limits.max_memory_mb = Some(mb);
    }
    if let Some(cpus) = options.max_cpus {
        spec.resource_limits.max_cpus = Some(cpus);
    }
    if let Some(size) = &options.max_log_size {
        spec.resource_limits.max_log_size_bytes = parse_byte_size(size)?;
    }
    Ok(())
}

/// Resolve operator options into a [`RunConfig`].
///
/// Relative paths resolve against `work_dir`. The result still has to pass
/// [`validate_run_config`](crate::config::validate_run_config) before use.
///
/// # Errors
///
/// Returns [`SyncError::ConfigInvalid`] for conflicting options, malformed
/// overrides or sizes, and unreadable run files.
pub fn resolve_run_config(options: &RunOptions, work_dir: &Path) -> Result<RunConfig> {
    let inline_given = options.source_image.is_some()
        || options.destination_image.is_some()
        || !options.overrides.is_empty();

    let (mut source, mut destination) = match &options.config_file {
        Some(_) if inline_given => {
            return Err(invalid(
                "--config-file cannot be combined with --src/--dst images or per-key overrides",
            ))
        }
        Some(path) => {
            let RunFile { src, dst } = parse_run_file(&work_dir.join(path))
                .map_err(|e| invalid(format!("{e:#}")))?;
            (
                connector_from_file(src).map_err(invalid)?,
                connector_from_file(dst).map_err(invalid)?,
            )
        }
        None => connectors_from_inline(options).map_err(invalid)?,
    };

    apply_limit_flags(options, &mut source).map_err(invalid)?;
    apply_limit_flags(options, &mut destination).map_err(invalid)?;

    let mode = resolve_mode(options, work_dir)?;
    let connection_name = options
        .connection_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string);

    let state_file = options.state_file.as_ref().map_or_else(
        || RunConfig::default_state_file(work_dir, connection_name.as_deref()),
        |p| work_dir.join(p),
    );

    let mut config = RunConfig::new(source, destination);
    config.mode = mode;
    config.full_refresh = options.full_refresh;
    config.raw_messages = options.raw_messages;
    config.state_file = state_file;
    config.connection_name = connection_name;
    config.keep_containers = options.keep_containers;
    config.log_level = options.log_level;
    config.destination_host_network = options.destination_host_network;
    config.destination_stream_prefix = options
        .destination_stream_prefix
        .clone()
        .filter(|p| !p.is_empty());
    config.check_connection = options.check_connection;
    config.pull_source = !options.no_source_pull;
    config.pull_destination = !options.no_destination_pull;
    config.handoff = if options.stream_handoff {
        HandoffMode::Streaming
    } else {
        HandoffMode::Buffered
    };
    config.work_dir = work_dir.to_path_buf();
    if let Some(root) = &options.workspace_root {
        config.workspace_root = work_dir.join(root);
    }
    Ok(config)
}
