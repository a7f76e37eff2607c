//! Run file parsing (YAML or JSON) with environment variable substitution.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

/// A byte size written either as a plain number or as a suffixed string
/// (`"10m"`, `"512k"`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ByteSizeValue {
    Bytes(u64),
    Text(String),
}

/// `resource_limits` block of a run file connector.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileLimits {
    #[serde(default)]
    pub max_memory_mb: Option<u64>,
    #[serde(default)]
    pub max_cpus: Option<f64>,
    #[serde(default, alias = "max_log_size_bytes")]
    pub max_log_size: Option<ByteSizeValue>,
}

/// One side (`src` or `dst`) of a run file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConnector {
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub config: Option<serde_json::Value>,
    #[serde(default)]
    pub catalog: Option<serde_json::Value>,
    #[serde(default)]
    pub resource_limits: Option<FileLimits>,
}

/// Parsed run file: `{src: {...}, dst: {...}}`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunFile {
    #[serde(default)]
    pub src: Option<FileConnector>,
    #[serde(default)]
    pub dst: Option<FileConnector>,
}

/// Substitute `${VAR_NAME}` patterns with environment variable values.
///
/// # Errors
///
/// Returns an error naming every referenced variable that is not set.
pub fn substitute_env_vars(input: &str) -> Result<String> {
    let mut missing = Vec::new();
    let result = ENV_VAR_RE.replace_all(input, |cap: &regex::Captures<'_>| {
        match std::env::var(&cap[1]) {
            Ok(val) => val,
            Err(_) => {
                missing.push(cap[1].to_string());
                String::new()
            }
        }
    });

    if !missing.is_empty() {
        anyhow::bail!("Missing environment variable(s): {}", missing.join(", "));
    }
    Ok(result.into_owned())
}

/// Parse run file contents (after env var substitution).
///
/// # Errors
///
/// Returns an error if substitution fails or the document is not a valid
/// run file.
pub fn parse_run_file_str(contents: &str) -> Result<RunFile> {
    let substituted = substitute_env_vars(contents)?;
    if substituted.trim().is_empty() {
        return Ok(RunFile::default());
    }
    serde_yaml::from_str(&substituted).context("Failed to parse run file")
}

/// Read and parse a run file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or does not parse.
pub fn parse_run_file(path: &Path) -> Result<RunFile> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read run file: {}", path.display()))?;
    parse_run_file_str(&contents)
}
