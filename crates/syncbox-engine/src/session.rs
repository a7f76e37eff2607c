//! Connector container sessions.

use std::sync::Arc;
use std::time::{Duration, Instant};

use syncbox_runtime::{AttachedIo, ContainerId, ContainerRuntime, ContainerSpec, HostLimits};
use syncbox_types::{Role, RunConfig};

use crate::error::{Result, SyncError};
use crate::workspace::Workspace;

/// Lifecycle phase of a connector container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Created,
    Starting,
    Running,
    Exited(i64),
    Removed,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => f.write_str("created"),
            Self::Starting => f.write_str("starting"),
            Self::Running => f.write_str("running"),
            Self::Exited(code) => write!(f, "exited({code})"),
            Self::Removed => f.write_str("removed"),
        }
    }
}

/// Build the container request for `role`.
///
/// Applies the role's resource limits, mounts the workspace, and sets
/// `LOG_LEVEL`. The destination gets an open stdin and, when requested, the
/// host network.
#[must_use]
pub fn container_spec(
    config: &RunConfig,
    workspace: &Workspace,
    role: Role,
    command: Vec<String>,
) -> ContainerSpec {
    let connector = config.connector(role);
    let is_destination = role == Role::Destination;
    ContainerSpec::new(connector.image.clone(), command)
        .env("LOG_LEVEL", config.log_level.as_str())
        .bind(workspace.path(), syncbox_runtime::WORKSPACE_MOUNT)
        .limits(HostLimits::from_limits(&connector.resource_limits))
        .network_host(is_destination && config.destination_host_network)
        .interactive(is_destination)
        .marker_file(
            config
                .work_dir
                .join(format!("{}_{}.cid", config.file_prefix(), role.short())),
        )
}

/// One connector container driven through the runtime adapter.
pub struct ConnectorSession {
    role: Role,
    image: String,
    id: ContainerId,
    phase: SessionPhase,
    started_at: Option<Instant>,
    runtime: Arc<dyn ContainerRuntime>,
}

impl std::fmt::Debug for ConnectorSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorSession")
            .field("role", &self.role)
            .field("image", &self.image)
            .field("id", &self.id)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

impl ConnectorSession {
    /// Create the container (not yet started).
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ContainerStartFailed`] when creation fails.
    pub async fn create(
        runtime: Arc<dyn ContainerRuntime>,
        role: Role,
        spec: &ContainerSpec,
    ) -> Result<Self> {
        let id = runtime.create(spec).await?;
        tracing::info!(
            connector = role.as_str(),
            image = %spec.image,
            container = id.short(),
            "Container created"
        );
        Ok(Self {
            role,
            image: spec.image.clone(),
            id,
            phase: SessionPhase::Created,
            started_at: None,
            runtime,
        })
    }

    fn transition(&mut self, phase: SessionPhase) {
        tracing::debug!(
            connector = self.role.as_str(),
            container = self.id.short(),
            from = %self.phase,
            to = %phase,
            "Session phase"
        );
        self.phase = phase;
    }

    /// Start the container and attach to its streams.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ContainerStartFailed`] when the start fails.
    pub async fn start(&mut self) -> Result<AttachedIo> {
        self.transition(SessionPhase::Starting);
        let io = self.runtime.start(&self.id).await?;
        self.started_at = Some(Instant::now());
        self.transition(SessionPhase::Running);
        Ok(io)
    }

    /// Suspend until the container exits and return its exit code.
    ///
    /// # Errors
    ///
    /// Returns the runtime error when the container cannot be waited on.
    pub async fn wait(&mut self) -> Result<i64> {
        let exit_code = self.runtime.wait(&self.id).await?;
        self.transition(SessionPhase::Exited(exit_code));
        Ok(exit_code)
    }

    /// Suspend until the container exits.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ConnectorFailed`] for a non-zero exit code.
    pub async fn wait_for_exit(&mut self) -> Result<()> {
        let exit_code = self.wait().await?;
        let elapsed = self.started_at.map_or(0.0, |t| t.elapsed().as_secs_f64());
        if exit_code != 0 {
            tracing::error!(
                connector = self.role.as_str(),
                image = %self.image,
                exit_code,
                duration_secs = elapsed,
                "Connector failed"
            );
            return Err(SyncError::ConnectorFailed {
                role: self.role,
                exit_code,
            });
        }
        tracing::info!(
            connector = self.role.as_str(),
            duration_secs = elapsed,
            "Connector finished"
        );
        Ok(())
    }

    /// Stop and remove the container now instead of at cleanup.
    ///
    /// # Errors
    ///
    /// Returns the runtime error; the session then stays eligible for cleanup.
    pub async fn remove(&mut self, grace: Duration) -> Result<()> {
        self.runtime.remove(&self.id, grace).await?;
        self.mark_removed();
        Ok(())
    }

    /// Record that the container has been removed by cleanup.
    pub fn mark_removed(&mut self) {
        self.transition(SessionPhase::Removed);
    }

    #[must_use]
    pub fn id(&self) -> &ContainerId {
        &self.id
    }

    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncbox_runtime::InMemoryRuntime;
    use syncbox_types::ConnectorSpec;

    fn config_in(root: &std::path::Path) -> RunConfig {
        let mut destination = ConnectorSpec::new("acme/dst");
        destination.resource_limits.max_cpus = Some(0.5);
        let mut config = RunConfig::new(ConnectorSpec::new("acme/src"), destination);
        config.workspace_root = root.to_path_buf();
        config.work_dir = root.to_path_buf();
        config.destination_host_network = true;
        config
    }

    #[test]
    fn destination_spec_is_interactive_with_host_network() {
        let root = tempfile::tempdir().unwrap();
        let config = config_in(root.path());
        let ws = Workspace::create(&config).unwrap();

        let dst = container_spec(&config, &ws, Role::Destination, ws.write_command());
        assert!(dst.interactive);
        assert!(dst.network_host);
        assert_eq!(dst.limits.nano_cpus, Some(500_000_000));
        assert_eq!(dst.env, vec![("LOG_LEVEL".to_string(), "info".to_string())]);
        assert_eq!(dst.binds[0].host, ws.path());
        assert_eq!(dst.binds[0].container, "/configs");
        assert_eq!(
            dst.marker_file.as_deref(),
            Some(root.path().join("syncbox_dst.cid").as_path())
        );

        let src = container_spec(&config, &ws, Role::Source, ws.read_command());
        assert!(!src.interactive);
        assert!(!src.network_host);
    }

    #[tokio::test]
    async fn phases_advance_through_lifecycle() {
        let runtime = Arc::new(InMemoryRuntime::new().script("acme/src", "read", "", 0));
        let spec = ContainerSpec::new("acme/src", vec!["read".into()]);
        let mut session = ConnectorSession::create(runtime.clone(), Role::Source, &spec)
            .await
            .unwrap();
        assert_eq!(session.phase(), SessionPhase::Created);
        session.start().await.unwrap();
        assert_eq!(session.phase(), SessionPhase::Running);
        session.wait_for_exit().await.unwrap();
        assert_eq!(session.phase(), SessionPhase::Exited(0));
        session.remove(Duration::ZERO).await.unwrap();
        assert_eq!(session.phase(), SessionPhase::Removed);
        assert_eq!(runtime.removed(), vec![session.id().clone()]);
    }

    #[tokio::test]
    async fn non_zero_exit_is_connector_failure() {
        let runtime = Arc::new(InMemoryRuntime::new().script("acme/dst", "write", "", 3));
        let spec = ContainerSpec::new("acme/dst", vec!["write".into()]);
        let mut session = ConnectorSession::create(runtime, Role::Destination, &spec)
            .await
            .unwrap();
        session.start().await.unwrap();
        let err = session.wait_for_exit().await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::ConnectorFailed {
                role: Role::Destination,
                exit_code: 3
            }
        ));
        assert_eq!(session.phase(), SessionPhase::Exited(3));
    }
}
