//! The capability interface the orchestrator drives containers through.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinSet;

use crate::error::Result;
use crate::spec::{ContainerId, ContainerSpec};

/// Grace period given to a container between stop and forced removal.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Extra slack on top of the grace period before a removal is abandoned.
const REMOVE_SLACK: Duration = Duration::from_secs(5);

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Streams attached to a started container.
///
/// Stderr is never part of this: adapters forward it to the operator's
/// stderr as it is produced.
pub struct AttachedIo {
    /// Container stdin; `None` unless the container was created interactive.
    pub stdin: Option<BoxedWriter>,
    pub stdout: BoxedReader,
}

impl std::fmt::Debug for AttachedIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachedIo")
            .field("stdin", &self.stdin.is_some())
            .finish_non_exhaustive()
    }
}

/// Container engine operations used by a sync run.
///
/// Implementations must be safe to share across tasks; the orchestrator
/// holds one as `Arc<dyn ContainerRuntime>`.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Fail fast when the engine is missing or unreachable.
    async fn check_available(&self) -> Result<()>;

    /// Pull `image` for the pinned platform.
    async fn pull_image(&self, image: &str) -> Result<()>;

    /// Create (but do not start) a container.
    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerId>;

    /// Start a created container and attach to its streams.
    async fn start(&self, id: &ContainerId) -> Result<AttachedIo>;

    /// Suspend until the container exits; returns its exit code.
    async fn wait(&self, id: &ContainerId) -> Result<i64>;

    /// Stop with a grace period, then force-remove.
    async fn remove(&self, id: &ContainerId, grace: Duration) -> Result<()>;
}

/// Remove every container in `ids`, one concurrent task per id.
///
/// Best-effort: failures are logged, never returned as errors. Returns the
/// ids that could not be removed.
pub async fn stop_all(
    runtime: Arc<dyn ContainerRuntime>,
    ids: &[ContainerId],
    grace: Duration,
) -> Vec<ContainerId> {
    let mut tasks = JoinSet::new();
    for id in ids {
        let runtime = Arc::clone(&runtime);
        let id = id.clone();
        tasks.spawn(async move {
            let removed =
                match tokio::time::timeout(grace + REMOVE_SLACK, runtime.remove(&id, grace)).await {
                    Ok(Ok(())) => {
                        tracing::debug!(container = id.short(), "Container removed");
                        true
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(container = id.short(), error = %e, "Failed to remove container");
                        false
                    }
                    Err(_) => {
                        tracing::warn!(container = id.short(), "Timed out removing container");
                        false
                    }
                };
            (id, removed)
        });
    }

    let mut failed = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((_, true)) => {}
            Ok((id, false)) => failed.push(id),
            Err(e) => tracing::warn!(error = %e, "Container removal task panicked"),
        }
    }
    failed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryRuntime;

    #[tokio::test]
    async fn stop_all_removes_every_id() {
        let runtime = Arc::new(InMemoryRuntime::new());
        let a = runtime
            .create(&ContainerSpec::new("acme/a", vec!["read".into()]))
            .await
            .unwrap();
        let b = runtime
            .create(&ContainerSpec::new("acme/b", vec!["write".into()]))
            .await
            .unwrap();

        let failed = stop_all(runtime.clone(), &[a.clone(), b.clone()], DEFAULT_STOP_TIMEOUT).await;
        assert!(failed.is_empty());

        let mut removed = runtime.removed();
        removed.sort_by(|x, y| x.as_str().cmp(y.as_str()));
        assert_eq!(removed, vec![a, b]);
    }

    #[tokio::test]
    async fn stop_all_reports_unknown_ids_without_erroring() {
        let runtime = Arc::new(InMemoryRuntime::new());
        let failed = stop_all(
            runtime.clone(),
            &[ContainerId::new("ghost")],
            Duration::from_millis(10),
        )
        .await;
        assert_eq!(failed, vec![ContainerId::new("ghost")]);
    }
}
