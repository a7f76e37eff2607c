//! Per-run workspace shared with connector containers.
//!
//! The workspace is a fresh directory under the workspace root, bind-mounted
//! read/write at [`WORKSPACE_MOUNT`] in every container of the run. It holds
//! the generated config and catalog files, `state.json`, and (for buffered
//! handoff) the spooled source output.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::Value;
use syncbox_runtime::WORKSPACE_MOUNT;
use syncbox_state::StateFile;
use syncbox_types::{RunConfig, SyncState};

use crate::error::{Result, SyncError};

const STATE_FILE_NAME: &str = "state.json";

/// Names of the generated files inside a workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceFiles {
    pub src_config: String,
    pub dst_config: String,
    pub src_catalog: String,
    pub dst_catalog: String,
    pub state: String,
    pub source_spool: String,
}

impl WorkspaceFiles {
    #[must_use]
    pub fn for_prefix(prefix: &str) -> Self {
        Self {
            src_config: format!("{prefix}_src_config.json"),
            dst_config: format!("{prefix}_dst_config.json"),
            src_catalog: format!("{prefix}_src_catalog.json"),
            dst_catalog: format!("{prefix}_dst_catalog.json"),
            state: STATE_FILE_NAME.to_string(),
            source_spool: format!("{prefix}_src_output.jsonl"),
        }
    }
}

/// Path of a workspace file as seen from inside a container.
#[must_use]
pub fn container_path(name: &str) -> String {
    format!("{WORKSPACE_MOUNT}/{name}")
}

fn write_json(path: &Path, value: &Value) -> io::Result<()> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    fs::write(path, bytes)
}

/// An exclusively-owned workspace directory.
#[derive(Debug)]
pub struct Workspace {
    dir: PathBuf,
    files: WorkspaceFiles,
}

impl Workspace {
    /// Create an empty, uniquely named workspace directory.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Workspace`] when the root cannot be created or
    /// the directory already exists.
    pub fn create(config: &RunConfig) -> Result<Self> {
        let prefix = config.file_prefix();
        fs::create_dir_all(&config.workspace_root)
            .map_err(|e| SyncError::workspace("creating workspace root", e))?;
        let dir = config
            .workspace_root
            .join(format!("syncbox-{prefix}-{}", uuid::Uuid::new_v4().simple()));
        fs::create_dir(&dir).map_err(|e| SyncError::workspace("creating workspace", e))?;
        tracing::debug!(path = %dir.display(), "Workspace created");
        Ok(Self {
            dir,
            files: WorkspaceFiles::for_prefix(&prefix),
        })
    }

    /// Create a workspace and write every input file, including the prior
    /// sync state. The directory is removed again if any step fails.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ConfigInvalid`] for an unreadable prior state
    /// file and [`SyncError::Workspace`] for file-system failures.
    pub fn prepare(config: &RunConfig) -> Result<Self> {
        let workspace = Self::create(config)?;
        let filled = load_prior_state(config).and_then(|state| {
            workspace.write_connector_files(config)?;
            workspace.write_state(&state)
        });
        match filled {
            Ok(()) => Ok(workspace),
            Err(e) => {
                workspace.remove();
                Err(e)
            }
        }
    }

    /// Write config and catalog files for both roles.
    ///
    /// An empty destination catalog inherits a non-empty source catalog.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Workspace`] on write failure.
    pub fn write_connector_files(&self, config: &RunConfig) -> Result<()> {
        let dst_catalog = if config.destination.catalog_is_empty() && !config.source.catalog_is_empty()
        {
            tracing::debug!("Destination catalog empty; inheriting source catalog");
            config.source.catalog_or_empty()
        } else {
            config.destination.catalog_or_empty()
        };

        let src_catalog = config.source.catalog_or_empty();
        let writes = [
            (&self.files.src_config, &config.source.config),
            (&self.files.dst_config, &config.destination.config),
            (&self.files.src_catalog, &src_catalog),
            (&self.files.dst_catalog, &dst_catalog),
        ];
        for (name, value) in writes {
            write_json(&self.dir.join(name), value)
                .map_err(|e| SyncError::workspace(format!("writing {name}"), e))?;
        }
        Ok(())
    }

    /// Write `state.json`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Workspace`] on write failure.
    pub fn write_state(&self, state: &SyncState) -> Result<()> {
        let mut contents = state.to_pretty_json();
        contents.push('\n');
        fs::write(self.dir.join(&self.files.state), contents)
            .map_err(|e| SyncError::workspace("writing state.json", e))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Host path of the buffered-handoff spool file.
    #[must_use]
    pub fn source_spool(&self) -> PathBuf {
        self.dir.join(&self.files.source_spool)
    }

    /// `check --config …`
    #[must_use]
    pub fn check_command(&self) -> Vec<String> {
        vec![
            "check".into(),
            "--config".into(),
            container_path(&self.files.src_config),
        ]
    }

    /// `read --config … --catalog … --state …`
    #[must_use]
    pub fn read_command(&self) -> Vec<String> {
        vec![
            "read".into(),
            "--config".into(),
            container_path(&self.files.src_config),
            "--catalog".into(),
            container_path(&self.files.src_catalog),
            "--state".into(),
            container_path(&self.files.state),
        ]
    }

    /// `write --config … --catalog …`
    #[must_use]
    pub fn write_command(&self) -> Vec<String> {
        vec![
            "write".into(),
            "--config".into(),
            container_path(&self.files.dst_config),
            "--catalog".into(),
            container_path(&self.files.dst_catalog),
        ]
    }

    /// Delete the workspace directory. Failures are logged, not returned.
    pub fn remove(self) {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => tracing::debug!(path = %self.dir.display(), "Workspace removed"),
            Err(e) => {
                tracing::warn!(path = %self.dir.display(), error = %e, "Failed to remove workspace");
            }
        }
    }
}

/// Prior sync state for this run.
///
/// Full-refresh runs never read the state file and start from `{}`; a
/// missing file also yields `{}`.
///
/// # Errors
///
/// Returns [`SyncError::ConfigInvalid`] when the file exists but is not a
/// readable JSON object.
pub fn load_prior_state(config: &RunConfig) -> Result<SyncState> {
    if config.full_refresh {
        tracing::debug!("Full refresh; ignoring prior state");
        return Ok(SyncState::new());
    }
    match StateFile::new(&config.state_file).load() {
        Ok(Some(state)) => {
            tracing::info!(path = %config.state_file.display(), "Loaded prior state");
            Ok(state)
        }
        Ok(None) => Ok(SyncState::new()),
        Err(e) => Err(SyncError::ConfigInvalid(e.to_string())),
    }
}

/// Write `<prefix>_config.json` to the working directory for operator
/// inspection. It is never read back.
///
/// # Errors
///
/// Returns [`SyncError::Workspace`] on write failure.
pub fn write_reference_file(config: &RunConfig) -> Result<PathBuf> {
    let path = config
        .work_dir
        .join(format!("{}_config.json", config.file_prefix()));
    let value = serde_json::json!({
        "src": config.source,
        "dst": config.destination,
    });
    write_json(&path, &value).map_err(|e| SyncError::workspace("writing reference file", e))?;
    Ok(path)
}
