//! [`ContainerRuntime`] backed by the `docker` command-line client.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};

use crate::adapter::{AttachedIo, BoxedReader, BoxedWriter, ContainerRuntime};
use crate::error::{Result, RuntimeError};
use crate::spec::{ContainerId, ContainerSpec};

struct Tracked {
    image: String,
    interactive: bool,
    marker: Option<PathBuf>,
    attached: Option<Child>,
}

/// Drives containers through the `docker` binary on `PATH`.
pub struct DockerCli {
    binary: PathBuf,
    containers: Mutex<HashMap<ContainerId, Tracked>>,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerCli {
    #[must_use]
    pub fn new() -> Self {
        Self::with_binary("docker")
    }

    /// Use a specific client binary (e.g. `podman`, or an absolute path).
    #[must_use]
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            containers: Mutex::new(HashMap::new()),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.kill_on_drop(true);
        cmd
    }

    fn tracked(&self) -> MutexGuard<'_, HashMap<ContainerId, Tracked>> {
        self.containers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn_error(&self, err: std::io::Error) -> RuntimeError {
        if err.kind() == std::io::ErrorKind::NotFound {
            RuntimeError::Unavailable(format!(
                "'{}' was not found on PATH",
                self.binary.display()
            ))
        } else {
            RuntimeError::Io(err)
        }
    }

    /// Run a short client command, capturing both output streams.
    async fn output(&self, args: &[String]) -> Result<Output> {
        tracing::trace!(binary = %self.binary.display(), ?args, "Invoking container client");
        self.command()
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| self.spawn_error(e))
    }

    async fn stop_and_remove(&self, id: &ContainerId, grace: Duration) -> Result<()> {
        let stop = self
            .output(&[
                "stop".to_string(),
                "--time".to_string(),
                grace.as_secs().to_string(),
                id.to_string(),
            ])
            .await?;
        if !stop.status.success() {
            tracing::debug!(container = id.short(), reason = %stderr_text(&stop), "Stop failed; forcing removal");
        }

        let rm = self
            .output(&["rm".to_string(), "--force".to_string(), id.to_string()])
            .await?;
        if !rm.status.success() {
            let reason = stderr_text(&rm);
            if !reason.contains("No such container") {
                return Err(RuntimeError::Operation {
                    id: id.to_string(),
                    reason,
                });
            }
        }
        Ok(())
    }
}

fn stderr_text(output: &Output) -> String {
    let text = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if text.is_empty() {
        format!("exited with {}", output.status)
    } else {
        text
    }
}

/// Platform, env, mounts, network, and limit flags for `create`.
fn host_args(spec: &ContainerSpec) -> Vec<String> {
    let mut args = vec!["--platform".to_string(), spec.platform.clone()];
    for (key, value) in &spec.env {
        args.push("--env".into());
        args.push(format!("{key}={value}"));
    }
    for bind in &spec.binds {
        args.push("--volume".into());
        args.push(bind.to_volume_arg());
    }
    if spec.network_host {
        args.push("--network".into());
        args.push("host".into());
    }
    if let Some(cpus) = spec.limits.cpus_arg() {
        args.push("--cpus".into());
        args.push(cpus);
    }
    if let Some(bytes) = spec.limits.memory_bytes {
        args.push("--memory".into());
        args.push(format!("{bytes}b"));
    }
    args.push("--log-opt".into());
    args.push(format!("max-size={}", spec.limits.log_max_size_bytes));
    args
}

pub(crate) fn create_args(spec: &ContainerSpec) -> Vec<String> {
    let mut args = vec!["create".to_string()];
    if spec.interactive {
        args.push("--interactive".into());
    }
    args.extend(host_args(spec));
    args.push(spec.image.clone());
    args.extend(spec.command.iter().cloned());
    args
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn check_available(&self) -> Result<()> {
        let args = [
            "version".to_string(),
            "--format".to_string(),
            "{{.Server.Version}}".to_string(),
        ];
        let output = self.output(&args).await?;
        if !output.status.success() {
            return Err(RuntimeError::Unavailable(stderr_text(&output)));
        }
        tracing::debug!(
            server_version = %String::from_utf8_lossy(&output.stdout).trim(),
            "Container engine reachable"
        );
        Ok(())
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        let args = [
            "pull".to_string(),
            "--platform".to_string(),
            crate::spec::DEFAULT_PLATFORM.to_string(),
            image.to_string(),
        ];
        let output = self.output(&args).await?;
        if !output.status.success() {
            return Err(RuntimeError::PullFailed {
                image: image.to_string(),
                reason: stderr_text(&output),
            });
        }
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerId> {
        let output = self.output(&create_args(spec)).await?;
        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !output.status.success() || id.is_empty() {
            return Err(RuntimeError::StartFailed {
                image: spec.image.clone(),
                reason: stderr_text(&output),
            });
        }
        let id = ContainerId::new(id);

        if let Some(marker) = &spec.marker_file {
            if let Err(e) = tokio::fs::write(marker, id.as_str()).await {
                tracing::warn!(path = %marker.display(), error = %e, "Failed to write container id marker");
            }
        }

        self.tracked().insert(
            id.clone(),
            Tracked {
                image: spec.image.clone(),
                interactive: spec.interactive,
                marker: spec.marker_file.clone(),
                attached: None,
            },
        );
        tracing::debug!(container = id.short(), image = %spec.image, "Container created");
        Ok(id)
    }

    async fn start(&self, id: &ContainerId) -> Result<AttachedIo> {
        let (image, interactive) = {
            let tracked = self.tracked();
            let entry = tracked
                .get(id)
                .ok_or_else(|| RuntimeError::UnknownContainer(id.to_string()))?;
            (entry.image.clone(), entry.interactive)
        };

        let mut cmd = self.command();
        cmd.args(["start", "--attach"]);
        if interactive {
            cmd.arg("--interactive").stdin(Stdio::piped());
        } else {
            cmd.stdin(Stdio::null());
        }
        let mut child = cmd
            .arg(id.as_str())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| RuntimeError::StartFailed {
                image: image.clone(),
                reason: e.to_string(),
            })?;

        let stdout = child.stdout.take().ok_or_else(|| RuntimeError::StartFailed {
            image: image.clone(),
            reason: "container stdout was not captured".into(),
        })?;
        let stdin = child.stdin.take();

        if let Some(entry) = self.tracked().get_mut(id) {
            entry.attached = Some(child);
        }

        Ok(AttachedIo {
            stdin: stdin.map(|s| Box::new(s) as BoxedWriter),
            stdout: Box::new(stdout) as BoxedReader,
        })
    }

    async fn wait(&self, id: &ContainerId) -> Result<i64> {
        let attached = self
            .tracked()
            .get_mut(id)
            .and_then(|entry| entry.attached.take());

        if let Some(mut child) = attached {
            let status = child.wait().await?;
            return Ok(status.code().map_or(-1, i64::from));
        }

        let output = self
            .output(&["wait".to_string(), id.to_string()])
            .await?;
        if !output.status.success() {
            return Err(RuntimeError::Operation {
                id: id.to_string(),
                reason: stderr_text(&output),
            });
        }
        String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse::<i64>()
            .map_err(|e| RuntimeError::Operation {
                id: id.to_string(),
                reason: format!("unparseable exit code: {e}"),
            })
    }

    async fn remove(&self, id: &ContainerId, grace: Duration) -> Result<()> {
        let tracked = self.tracked().remove(id);
        let removed = self.stop_and_remove(id, grace).await;
        if let Some(entry) = tracked {
            release(entry).await;
        }
        removed
    }
}

/// Kill the attached client and delete the id marker of a container that is
/// no longer tracked, whether or not the engine removal succeeded.
async fn release(mut entry: Tracked) {
    if let Some(mut child) = entry.attached.take() {
        let _ = child.start_kill();
    }
    if let Some(marker) = entry.marker {
        match tokio::fs::remove_file(&marker).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %marker.display(), error = %e, "Failed to remove container id marker");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{HostLimits, WORKSPACE_MOUNT};

    fn write_spec() -> ContainerSpec {
        ContainerSpec::new(
            "acme/destination-pg:1.0",
            vec![
                "write".into(),
                "--config".into(),
                "/configs/syncbox_dst_config.json".into(),
            ],
        )
        .env("LOG_LEVEL", "debug")
        .bind("/tmp/ws", WORKSPACE_MOUNT)
        .network_host(true)
        .interactive(true)
        .limits(HostLimits {
            nano_cpus: Some(2_000_000_000),
            memory_bytes: Some(256 * 1024 * 1024),
            log_max_size_bytes: 1024,
        })
    }

    #[test]
    fn create_args_render_every_option() {
        let args = create_args(&write_spec());
        assert_eq!(
            args,
            vec![
                "create",
                "--interactive",
                "--platform",
                "linux/amd64",
                "--env",
                "LOG_LEVEL=debug",
                "--volume",
                "/tmp/ws:/configs",
                "--network",
                "host",
                "--cpus",
                "2",
                "--memory",
                "268435456b",
                "--log-opt",
                "max-size=1024",
                "acme/destination-pg:1.0",
                "write",
                "--config",
                "/configs/syncbox_dst_config.json",
            ]
        );
    }

    #[tokio::test]
    async fn missing_binary_reports_unavailable() {
        let runtime = DockerCli::with_binary("/nonexistent/syncbox-docker-client");
        let err = runtime.check_available().await.unwrap_err();
        assert!(matches!(err, RuntimeError::Unavailable(_)), "got: {err}");
    }

    #[tokio::test]
    async fn failed_removal_still_clears_marker() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("syncbox_dst.cid");
        std::fs::write(&marker, "0123456789ab").unwrap();

        let runtime = DockerCli::with_binary("/nonexistent/syncbox-docker-client");
        let id = ContainerId::new("0123456789ab");
        runtime.tracked().insert(
            id.clone(),
            Tracked {
                image: "acme/destination-pg:1.0".into(),
                interactive: true,
                marker: Some(marker.clone()),
                attached: None,
            },
        );

        let err = runtime.remove(&id, Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Unavailable(_)), "got: {err}");
        assert!(!marker.exists());
        assert!(runtime.tracked().is_empty());
    }

    #[tokio::test]
    async fn start_unknown_container_is_rejected() {
        let runtime = DockerCli::new();
        let err = runtime.start(&ContainerId::new("nope")).await.unwrap_err();
        assert!(matches!(err, RuntimeError::UnknownContainer(_)));
    }
}
