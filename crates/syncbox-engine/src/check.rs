//! Source connection verification via the connector's `check` command.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use syncbox_runtime::{ContainerRuntime, DEFAULT_STOP_TIMEOUT};
use syncbox_types::{ConnectionStatus, ConnectionStatusKind, ProtocolMessage, Role, RunConfig};
use tokio::io::AsyncReadExt;

use crate::config::validate_run_config;
use crate::error::{Result, SyncError};
use crate::orchestrator::{wait_for_interrupt, RunResources};
use crate::protocol::LineBuffer;
use crate::result::CheckReport;
use crate::session::{container_spec, ConnectorSession};
use crate::workspace::Workspace;

/// Exit code and stdout of a finished `check` container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutput {
    pub exit_code: i64,
    pub stdout: Vec<u8>,
}

/// Last `CONNECTION_STATUS` reported in `stdout`.
fn find_status(stdout: &[u8]) -> Option<ConnectionStatus> {
    let mut lines = LineBuffer::new();
    let mut all = lines.push(stdout);
    all.extend(lines.finish());
    all.iter()
        .filter_map(|line| ProtocolMessage::parse(line).ok())
        .filter_map(|msg| msg.connection_status())
        .last()
}

/// Decide whether a `check` run succeeded.
///
/// Success requires a `SUCCEEDED` status and exit code 0. Returns the
/// connector's success message, if any.
///
/// # Errors
///
/// Returns [`SyncError::ConnectionCheckFailed`] carrying the connector's
/// message, or the trimmed raw output when it reported none.
pub fn evaluate_check(run: &CheckOutput) -> Result<Option<String>> {
    let status = find_status(&run.stdout);
    if let Some(status) = &status {
        if status.status == ConnectionStatusKind::Succeeded && run.exit_code == 0 {
            return Ok(status.message.clone());
        }
    }

    let message = status.and_then(|s| s.message).unwrap_or_else(|| {
        let raw = String::from_utf8_lossy(&run.stdout).trim().to_string();
        if raw.is_empty() {
            format!(
                "connector exited with code {} without reporting a connection status",
                run.exit_code
            )
        } else {
            raw
        }
    });
    Err(SyncError::ConnectionCheckFailed { message })
}

fn check_marker(config: &RunConfig) -> PathBuf {
    config
        .work_dir
        .join(format!("{}_src_check.cid", config.file_prefix()))
}

/// Run the source `check` command against an existing workspace.
///
/// The container is tracked in `slot` from creation on, so a caller that
/// abandons this future can still stop it. It is removed once it has exited
/// unless containers are being kept.
///
/// # Errors
///
/// Returns [`SyncError::ConnectionCheckFailed`] when the check does not
/// succeed, or the runtime error when the container cannot run.
pub async fn run_connection_check(
    runtime: &Arc<dyn ContainerRuntime>,
    config: &RunConfig,
    workspace: &Workspace,
    slot: &mut Option<ConnectorSession>,
) -> Result<Option<String>> {
    let spec = container_spec(config, workspace, Role::Source, workspace.check_command())
        .marker_file(check_marker(config));
    tracing::info!(image = %spec.image, "Checking source connection");

    let session = ConnectorSession::create(Arc::clone(runtime), Role::Source, &spec).await?;
    let session = slot.insert(session);
    let mut io = session.start().await?;
    let mut stdout = Vec::new();
    io.stdout
        .read_to_end(&mut stdout)
        .await
        .map_err(SyncError::Stream)?;
    let exit_code = session.wait().await?;
    if !config.keep_containers {
        if let Err(e) = session.remove(DEFAULT_STOP_TIMEOUT).await {
            tracing::warn!(container = session.id().short(), error = %e, "Failed to remove check container");
        }
    }

    let message = evaluate_check(&CheckOutput { exit_code, stdout })?;
    tracing::info!(
        message = message.as_deref().unwrap_or(""),
        "Connection check succeeded"
    );
    Ok(message)
}

/// Standalone connection check, cancelled on Ctrl-C.
///
/// # Errors
///
/// See [`check_connection_until`].
pub async fn check_connection(
    runtime: Arc<dyn ContainerRuntime>,
    config: &RunConfig,
) -> Result<CheckReport> {
    check_connection_until(runtime, config, wait_for_interrupt()).await
}

/// Standalone connection check: validate, prepare a workspace with the
/// connector files, pull the source image if requested, run `check`, then
/// remove the container and workspace again. Cancelled when `shutdown`
/// resolves first.
///
/// # Errors
///
/// Returns the first failure among validation, runtime availability, the
/// pull, and the check itself; [`SyncError::Interrupted`] on cancellation.
pub async fn check_connection_until<F>(
    runtime: Arc<dyn ContainerRuntime>,
    config: &RunConfig,
    shutdown: F,
) -> Result<CheckReport>
where
    F: Future<Output = ()>,
{
    let started = Instant::now();
    validate_run_config(config)?;
    runtime.check_available().await?;

    let mut res = RunResources::default();
    let workspace = &*res.workspace.insert(Workspace::create(config)?);
    let slot = &mut res.check;
    let checked = async {
        workspace.write_connector_files(config)?;
        if config.pull_source {
            tracing::info!(image = %config.source.image, "Pulling image");
            runtime.pull_image(&config.source.image).await?;
        }
        run_connection_check(&runtime, config, workspace, slot).await
    };
    let outcome = tokio::select! {
        result = checked => result,
        () = shutdown => {
            tracing::warn!("Interrupt received, stopping connection check");
            Err(SyncError::Interrupted)
        }
    };
    res.cleanup(&runtime, config.keep_containers).await;

    Ok(CheckReport {
        image: config.source.image.clone(),
        message: outcome?,
        duration_secs: started.elapsed().as_secs_f64(),
    })
}
