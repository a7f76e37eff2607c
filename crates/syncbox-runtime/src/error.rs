//! Runtime adapter error types.

/// Errors from the container runtime layer.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The container engine is not installed or not reachable.
    #[error("container runtime unavailable: {0}")]
    Unavailable(String),

    /// `pull` failed for an image.
    #[error("failed to pull image '{image}': {reason}")]
    PullFailed { image: String, reason: String },

    /// A container could not be created or started.
    #[error("failed to start container for image '{image}': {reason}")]
    StartFailed { image: String, reason: String },

    /// The id does not name a container this adapter created.
    #[error("unknown container '{0}'")]
    UnknownContainer(String),

    /// A lifecycle call (wait/stop/remove) failed for a known container.
    #[error("container {id}: {reason}")]
    Operation { id: String, reason: String },

    /// I/O error talking to the engine or its attached streams.
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err = RuntimeError::from(io_err);
        assert!(err.to_string().contains("pipe closed"));
    }

    #[test]
    fn pull_failed_names_image() {
        let err = RuntimeError::PullFailed {
            image: "acme/source-pg:2.1".into(),
            reason: "manifest unknown".into(),
        };
        assert_eq!(
            err.to_string(),
            "failed to pull image 'acme/source-pg:2.1': manifest unknown"
        );
    }
}
