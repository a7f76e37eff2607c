//! State persistence error types.

use std::path::PathBuf;

/// Errors produced by [`StateFile`](crate::StateFile) operations.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// File-system failure reading or replacing the state file.
    #[error("i/o error on state file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The state file exists but is not valid JSON.
    #[error("state file {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The state file is valid JSON but not an object.
    #[error("state file {path}: {source}")]
    Shape {
        path: PathBuf,
        #[source]
        source: syncbox_types::state::NotAnObject,
    },
}

impl StateError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, StateError>;
