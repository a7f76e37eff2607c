//! Normalized description of one sync job.
//!
//! A [`RunConfig`] is produced once, at the options boundary, and is
//! read-only for the rest of the run. The [`RunMode`] enum makes the
//! "exactly one of two-sided / source-only / destination-only" rule
//! structural rather than a combination of flags.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::role::Role;

/// Default container log rotation size (10 MiB).
pub const DEFAULT_MAX_LOG_SIZE_BYTES: u64 = 10 * 1024 * 1024;

/// Per-connector container resource limits, in operator units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Memory ceiling in MiB. `None` means unlimited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_memory_mb: Option<u64>,
    /// CPU ceiling as a (fractional) number of cores. `None` means unlimited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cpus: Option<f64>,
    /// Container log rotation size in bytes.
    #[serde(default = "default_max_log_size")]
    pub max_log_size_bytes: u64,
}

fn default_max_log_size() -> u64 {
    DEFAULT_MAX_LOG_SIZE_BYTES
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_memory_mb: None,
            max_cpus: None,
            max_log_size_bytes: DEFAULT_MAX_LOG_SIZE_BYTES,
        }
    }
}

/// One connector's image, configuration, catalog, and limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorSpec {
    pub image: String,
    #[serde(default = "empty_object")]
    pub config: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog: Option<serde_json::Value>,
    #[serde(default)]
    pub resource_limits: ResourceLimits,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl Default for ConnectorSpec {
    fn default() -> Self {
        Self {
            image: String::new(),
            config: empty_object(),
            catalog: None,
            resource_limits: ResourceLimits::default(),
        }
    }
}

impl ConnectorSpec {
    /// Create a spec for `image` with an empty config.
    #[must_use]
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Self::default()
        }
    }

    /// Catalog to write into the workspace; absent or `null` catalogs become
    /// `{}`.
    #[must_use]
    pub fn catalog_or_empty(&self) -> serde_json::Value {
        match &self.catalog {
            None | Some(serde_json::Value::Null) => empty_object(),
            Some(catalog) => catalog.clone(),
        }
    }

    /// `true` when the catalog is missing, `null`, or an empty object.
    #[must_use]
    pub fn catalog_is_empty(&self) -> bool {
        match &self.catalog {
            None => true,
            Some(serde_json::Value::Object(map)) => map.is_empty(),
            Some(serde_json::Value::Null) => true,
            Some(_) => false,
        }
    }
}

/// Where a source-only run writes its forwarded messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceOutput {
    /// Operator terminal, framed with a timestamp and `[SRC]` tag.
    Stdout,
    /// File receiving byte-identical forwarded lines.
    File(PathBuf),
}

/// Which sides of the sync execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    /// Source feeds destination.
    Sync,
    /// Only the source runs; its output goes to a file or the terminal.
    SourceOnly { output: SourceOutput },
    /// Only the destination runs, fed from a previously captured file.
    DestinationOnly { input: PathBuf },
}

impl RunMode {
    #[must_use]
    pub fn runs_source(&self) -> bool {
        !matches!(self, Self::DestinationOnly { .. })
    }

    #[must_use]
    pub fn runs_destination(&self) -> bool {
        !matches!(self, Self::SourceOnly { .. })
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::SourceOnly { .. } => "source_only",
            Self::DestinationOnly { .. } => "destination_only",
        }
    }
}

/// How source output reaches the destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HandoffMode {
    /// Run the source to completion into the workspace spool file
    /// (`<prefix>_src_output.jsonl`), then replay it into the destination.
    #[default]
    Buffered,
    /// Start the destination first and pipe source output straight into it.
    Streaming,
}

/// Log verbosity for the operator log and the `LOG_LEVEL` container env.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" | "fatal" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            other => Err(format!(
                "unknown log level '{other}' (expected error, warn, info, debug, trace)"
            )),
        }
    }
}

/// Fully resolved description of one sync job.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub source: ConnectorSpec,
    pub destination: ConnectorSpec,
    pub mode: RunMode,
    pub full_refresh: bool,
    pub raw_messages: bool,
    pub state_file: PathBuf,
    pub connection_name: Option<String>,
    pub keep_containers: bool,
    pub log_level: LogLevel,
    pub destination_host_network: bool,
    pub destination_stream_prefix: Option<String>,
    pub check_connection: bool,
    pub pull_source: bool,
    pub pull_destination: bool,
    pub handoff: HandoffMode,
    /// Process working directory: receives the reference config file and
    /// container-id marker files.
    pub work_dir: PathBuf,
    /// Parent directory for the per-run workspace.
    pub workspace_root: PathBuf,
}

impl RunConfig {
    /// A two-sided run with defaults for every optional field.
    #[must_use]
    pub fn new(source: ConnectorSpec, destination: ConnectorSpec) -> Self {
        Self {
            source,
            destination,
            mode: RunMode::Sync,
            full_refresh: false,
            raw_messages: false,
            state_file: PathBuf::from("state.json"),
            connection_name: None,
            keep_containers: false,
            log_level: LogLevel::Info,
            destination_host_network: false,
            destination_stream_prefix: None,
            check_connection: false,
            pull_source: true,
            pull_destination: true,
            handoff: HandoffMode::Buffered,
            work_dir: PathBuf::from("."),
            workspace_root: std::env::temp_dir(),
        }
    }

    /// Connector spec for `role`.
    #[must_use]
    pub fn connector(&self, role: Role) -> &ConnectorSpec {
        match role {
            Role::Source => &self.source,
            Role::Destination => &self.destination,
        }
    }

    /// Roles that execute a container in this run, in execution order.
    #[must_use]
    pub fn active_roles(&self) -> Vec<Role> {
        let mut roles = Vec::with_capacity(2);
        if self.mode.runs_source() {
            roles.push(Role::Source);
        }
        if self.mode.runs_destination() {
            roles.push(Role::Destination);
        }
        roles
    }

    /// Whether the image for `role` should be pulled before use.
    #[must_use]
    pub fn should_pull(&self, role: Role) -> bool {
        match role {
            Role::Source => self.pull_source && self.mode.runs_source(),
            Role::Destination => self.pull_destination && self.mode.runs_destination(),
        }
    }

    /// File-name prefix for generated files: the sanitized connection name,
    /// or `syncbox` when none is set.
    #[must_use]
    pub fn file_prefix(&self) -> String {
        match self.connection_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => sanitize_file_component(name),
            _ => "syncbox".to_string(),
        }
    }

    /// Default state-file location for a connection name, relative to `work_dir`.
    #[must_use]
    pub fn default_state_file(work_dir: &Path, connection_name: Option<&str>) -> PathBuf {
        match connection_name.map(str::trim) {
            Some(name) if !name.is_empty() => {
                work_dir.join(format!("{}_state.json", sanitize_file_component(name)))
            }
            _ => work_dir.join("state.json"),
        }
    }
}

fn sanitize_file_component(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
