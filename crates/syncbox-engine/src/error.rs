//! Sync run error model.

use syncbox_runtime::RuntimeError;
use syncbox_types::Role;

/// Why a sync run (or a standalone connection check) failed.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The resolved configuration is unusable; nothing was started.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("failed to pull image '{image}': {reason}")]
    PullFailed { image: String, reason: String },

    #[error("failed to start container for image '{image}': {reason}")]
    ContainerStartFailed { image: String, reason: String },

    /// The source's `check` command did not report success.
    #[error("connection check failed: {message}")]
    ConnectionCheckFailed { message: String },

    /// A connector container exited non-zero.
    #[error("{role} connector exited with code {exit_code}")]
    ConnectorFailed { role: Role, exit_code: i64 },

    #[error("workspace error ({context}): {source}")]
    Workspace {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Reading or writing a protocol stream failed.
    #[error("stream error: {0}")]
    Stream(#[source] std::io::Error),

    /// The run was cancelled by the operator (Ctrl-C).
    #[error("run interrupted")]
    Interrupted,

    /// Container lifecycle failure that fits no other category.
    #[error("container runtime error: {0}")]
    Runtime(#[source] RuntimeError),
}

impl SyncError {
    pub(crate) fn workspace(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Workspace {
            context: context.into(),
            source,
        }
    }

    /// Process exit code the CLI reports for this error.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConfigInvalid(_) => 2,
            Self::Interrupted => 130,
            _ => 1,
        }
    }
}

impl From<RuntimeError> for SyncError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::Unavailable(reason) => Self::RuntimeUnavailable(reason),
            RuntimeError::PullFailed { image, reason } => Self::PullFailed { image, reason },
            RuntimeError::StartFailed { image, reason } => {
                Self::ContainerStartFailed { image, reason }
            }
            RuntimeError::Io(e) => Self::Stream(e),
            other @ (RuntimeError::UnknownContainer(_) | RuntimeError::Operation { .. }) => {
                Self::Runtime(other)
            }
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, SyncError>;
