//! Sync run orchestration: validates the run, prepares the workspace, drives
//! the connector containers, streams protocol messages between them, and
//! reconciles the final state.
//!
//! Container and workspace cleanup runs on every exit path: success,
//! connector failure, stream errors, and operator interrupts.

use std::future::Future;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use syncbox_runtime::{stop_all, ContainerId, ContainerRuntime, DEFAULT_STOP_TIMEOUT};
use syncbox_state::StateFile;
use syncbox_types::{HandoffMode, Role, RunConfig, RunMode, SourceOutput, SyncState};
use tokio::io::AsyncRead;
use tokio::task::JoinHandle;

use crate::check::run_connection_check;
use crate::config::validate_run_config;
use crate::error::{Result, SyncError};
use crate::protocol::{drain, pump, OutputSink, StreamProcessor, StreamStats};
use crate::result::RunSummary;
use crate::session::{container_spec, ConnectorSession, SessionPhase};
use crate::workspace::{write_reference_file, Workspace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunPhase {
    Init,
    Validated,
    WorkspaceReady,
    ConnectionChecked,
    SourceRunning,
    Piping,
    DestinationRunning,
    StateReconciled,
    CleanedUp,
    Done,
    Failing,
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::Validated => "validated",
            Self::WorkspaceReady => "workspace_ready",
            Self::ConnectionChecked => "connection_checked",
            Self::SourceRunning => "source_running",
            Self::Piping => "piping",
            Self::DestinationRunning => "destination_running",
            Self::StateReconciled => "state_reconciled",
            Self::CleanedUp => "cleaned_up",
            Self::Done => "done",
            Self::Failing => "failing",
        };
        f.write_str(name)
    }
}

fn enter(phase: RunPhase) {
    tracing::debug!(phase = %phase, "Run phase");
}

/// Everything a run has created that cleanup must release.
#[derive(Debug, Default)]
pub(crate) struct RunResources {
    pub(crate) workspace: Option<Workspace>,
    pub(crate) check: Option<ConnectorSession>,
    pub(crate) source: Option<ConnectorSession>,
    pub(crate) destination: Option<ConnectorSession>,
    /// Held open until the destination is stopped; closing it earlier would
    /// tell the destination its input is complete.
    pub(crate) destination_stdin: Option<OutputSink>,
}

impl RunResources {
    fn sessions(&self) -> impl Iterator<Item = &ConnectorSession> {
        [&self.check, &self.source, &self.destination]
            .into_iter()
            .flatten()
            .filter(|s| s.phase() != SessionPhase::Removed)
    }

    pub(crate) async fn cleanup(&mut self, runtime: &Arc<dyn ContainerRuntime>, keep: bool) {
        if keep {
            let containers: Vec<&str> = self.sessions().map(|s| s.id().short()).collect();
            tracing::info!(
                containers = ?containers,
                workspace = ?self.workspace.as_ref().map(|w| w.path().display().to_string()),
                "Keeping containers and workspace"
            );
            return;
        }

        let ids: Vec<ContainerId> = self.sessions().map(|s| s.id().clone()).collect();
        if !ids.is_empty() {
            let failed = stop_all(Arc::clone(runtime), &ids, DEFAULT_STOP_TIMEOUT).await;
            for session in [&mut self.check, &mut self.source, &mut self.destination]
                .into_iter()
                .flatten()
            {
                if ids.contains(session.id()) && !failed.contains(session.id()) {
                    session.mark_removed();
                }
            }
        }
        drop(self.destination_stdin.take());

        if let Some(workspace) = self.workspace.take() {
            workspace.remove();
        }
    }
}

type DestinationOutput = JoinHandle<std::io::Result<StreamStats>>;

/// Drives one sync run against a container runtime.
pub struct Orchestrator {
    runtime: Arc<dyn ContainerRuntime>,
    config: RunConfig,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    #[must_use]
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: RunConfig) -> Self {
        Self { runtime, config }
    }

    /// Execute the run, cancelling it on Ctrl-C.
    ///
    /// # Errors
    ///
    /// Returns the first fatal [`SyncError`]; [`SyncError::Interrupted`] when
    /// the operator cancelled the run. Cleanup has completed either way.
    pub async fn run(&self) -> Result<RunSummary> {
        self.run_until(wait_for_interrupt()).await
    }

    /// Execute the run, cancelling it when `shutdown` resolves first.
    ///
    /// # Errors
    ///
    /// See [`Orchestrator::run`].
    pub async fn run_until<F>(&self, shutdown: F) -> Result<RunSummary>
    where
        F: Future<Output = ()>,
    {
        let started = Instant::now();
        tracing::info!(
            mode = self.config.mode.as_str(),
            source = %self.config.source.image,
            destination = %self.config.destination.image,
            full_refresh = self.config.full_refresh,
            "Starting sync run"
        );

        let mut resources = RunResources::default();
        let outcome = tokio::select! {
            result = self.execute(&mut resources) => result,
            () = shutdown => {
                tracing::warn!("Interrupt received, stopping connectors");
                Err(SyncError::Interrupted)
            }
        };
        if let Err(e) = &outcome {
            enter(RunPhase::Failing);
            tracing::debug!(error = %e, "Run failing");
        }

        resources
            .cleanup(&self.runtime, self.config.keep_containers)
            .await;
        enter(RunPhase::CleanedUp);

        let mut summary = outcome?;
        summary.duration_secs = started.elapsed().as_secs_f64();
        enter(RunPhase::Done);
        tracing::info!(
            mode = summary.mode,
            records = summary.records_forwarded,
            states = summary.states_captured,
            dropped = summary.lines_dropped,
            state_persisted = summary.state_persisted,
            duration_secs = summary.duration_secs,
            "Sync run complete"
        );
        Ok(summary)
    }

    async fn execute(&self, res: &mut RunResources) -> Result<RunSummary> {
        let config = &self.config;
        enter(RunPhase::Init);
        validate_run_config(config)?;
        if config.check_connection && !config.mode.runs_source() {
            tracing::warn!("Connection check skipped: the source does not run in destination-only mode");
        }
        enter(RunPhase::Validated);

        self.runtime.check_available().await?;

        let for_prepare = config.clone();
        let workspace = tokio::task::spawn_blocking(move || Workspace::prepare(&for_prepare))
            .await
            .map_err(|e| {
                SyncError::workspace(
                    "preparing workspace",
                    std::io::Error::other(format!("prepare task panicked: {e}")),
                )
            })??;
        let workspace = &*res.workspace.insert(workspace);
        tracing::info!(path = %workspace.path().display(), "Workspace ready");
        match write_reference_file(config) {
            Ok(path) => tracing::debug!(path = %path.display(), "Wrote reference config"),
            Err(e) => tracing::warn!(error = %e, "Failed to write reference config"),
        }
        enter(RunPhase::WorkspaceReady);

        for role in config.active_roles() {
            let image = &config.connector(role).image;
            if config.should_pull(role) {
                tracing::info!(connector = role.as_str(), image = %image, "Pulling image");
                self.runtime.pull_image(image).await?;
            } else {
                tracing::info!(connector = role.as_str(), image = %image, "Skipping image pull");
            }
        }

        if config.check_connection && config.mode.runs_source() {
            run_connection_check(&self.runtime, config, workspace, &mut res.check).await?;
            enter(RunPhase::ConnectionChecked);
        }

        let mut processor = match &config.mode {
            RunMode::SourceOnly { output } => {
                self.source_only(workspace, &mut res.source, output).await?
            }
            RunMode::Sync => match config.handoff {
                HandoffMode::Buffered => {
                    self.sync_buffered(
                        workspace,
                        &mut res.source,
                        &mut res.destination,
                        &mut res.destination_stdin,
                    )
                    .await?
                }
                HandoffMode::Streaming => {
                    self.sync_streaming(
                        workspace,
                        &mut res.source,
                        &mut res.destination,
                        &mut res.destination_stdin,
                    )
                    .await?
                }
            },
            RunMode::DestinationOnly { input } => {
                self.destination_only(
                    workspace,
                    &mut res.destination,
                    &mut res.destination_stdin,
                    input,
                )
                .await?
            }
        };

        let stats = processor.stats();
        let mut summary = RunSummary::for_mode(&config.mode);
        summary.records_forwarded = stats.records_forwarded;
        summary.states_captured = stats.states_captured;
        summary.lines_dropped = stats.lines_dropped;

        self.reconcile_state(processor.take_captured_state(), &mut summary)
            .await;
        enter(RunPhase::StateReconciled);
        Ok(summary)
    }

    /// Source forwarded lines for the configured output, with `STATE` kept
    /// out of the output unless running raw.
    fn source_processor(&self, to_destination: bool) -> StreamProcessor {
        let processor = StreamProcessor::new(Role::Source)
            .raw(self.config.raw_messages)
            .forward_state(to_destination);
        if to_destination {
            processor.stream_prefix(self.config.destination_stream_prefix.clone())
        } else {
            processor
        }
    }

    async fn source_only(
        &self,
        workspace: &Workspace,
        slot: &mut Option<ConnectorSession>,
        output: &SourceOutput,
    ) -> Result<StreamProcessor> {
        let mut sink = match output {
            SourceOutput::File(path) => OutputSink::file(path).await.map_err(|e| {
                SyncError::workspace(format!("creating output file {}", path.display()), e)
            })?,
            SourceOutput::Stdout => OutputSink::terminal(),
        };
        let mut processor = self.source_processor(false);
        self.run_source(workspace, slot, &mut processor, &mut sink)
            .await?;
        sink.close().await.map_err(SyncError::Stream)?;
        Ok(processor)
    }

    /// Run the source to completion into the workspace spool, then replay the
    /// spool verbatim into the destination.
    async fn sync_buffered(
        &self,
        workspace: &Workspace,
        src_slot: &mut Option<ConnectorSession>,
        dst_slot: &mut Option<ConnectorSession>,
        stdin_slot: &mut Option<OutputSink>,
    ) -> Result<StreamProcessor> {
        let spool_path = workspace.source_spool();
        let mut spool = OutputSink::file(&spool_path)
            .await
            .map_err(|e| SyncError::workspace("creating source spool", e))?;
        let mut processor = self.source_processor(true);
        self.run_source(workspace, src_slot, &mut processor, &mut spool)
            .await?;
        spool.close().await.map_err(SyncError::Stream)?;

        let mut spooled = tokio::fs::File::open(&spool_path)
            .await
            .map_err(|e| SyncError::workspace("opening source spool", e))?;
        let mut replay = StreamProcessor::new(Role::Source).raw(true);
        self.feed_destination(workspace, dst_slot, stdin_slot, &mut spooled, &mut replay)
            .await?;
        Ok(processor)
    }

    /// Start the destination first and pipe source output straight into its
    /// stdin. A stalled destination blocks the pump, which stops source reads.
    async fn sync_streaming(
        &self,
        workspace: &Workspace,
        src_slot: &mut Option<ConnectorSession>,
        dst_slot: &mut Option<ConnectorSession>,
        stdin_slot: &mut Option<OutputSink>,
    ) -> Result<StreamProcessor> {
        let (destination, stdin, output) =
            self.start_destination(workspace, dst_slot, stdin_slot).await?;

        let mut processor = self.source_processor(true);
        match self
            .run_source(workspace, src_slot, &mut processor, stdin)
            .await
        {
            Ok(()) => {}
            Err(SyncError::Stream(e)) if e.kind() == ErrorKind::BrokenPipe => {
                // The destination closed its stdin; its exit status is the
                // failure to report.
                drop(stdin_slot.take());
                finish_destination(destination, output, Ok(())).await?;
                return Err(SyncError::Stream(e));
            }
            Err(e) => return Err(e),
        }

        let fed = close_stdin(stdin_slot).await;
        finish_destination(destination, output, fed).await?;
        Ok(processor)
    }

    async fn destination_only(
        &self,
        workspace: &Workspace,
        slot: &mut Option<ConnectorSession>,
        stdin_slot: &mut Option<OutputSink>,
        input: &Path,
    ) -> Result<StreamProcessor> {
        let mut file = tokio::fs::File::open(input).await.map_err(|e| {
            SyncError::ConfigInvalid(format!(
                "cannot open destination input {}: {e}",
                input.display()
            ))
        })?;
        tracing::info!(path = %input.display(), "Feeding destination from file");
        let mut processor = self.source_processor(true);
        self.feed_destination(workspace, slot, stdin_slot, &mut file, &mut processor)
            .await?;
        Ok(processor)
    }

    async fn run_source(
        &self,
        workspace: &Workspace,
        slot: &mut Option<ConnectorSession>,
        processor: &mut StreamProcessor,
        sink: &mut OutputSink,
    ) -> Result<()> {
        let spec = container_spec(
            &self.config,
            workspace,
            Role::Source,
            workspace.read_command(),
        );
        let session = ConnectorSession::create(Arc::clone(&self.runtime), Role::Source, &spec).await?;
        let session = slot.insert(session);
        let mut io = session.start().await?;
        enter(RunPhase::SourceRunning);

        enter(RunPhase::Piping);
        let stats = pump(&mut io.stdout, processor, sink)
            .await
            .map_err(SyncError::Stream)?;
        session.wait_for_exit().await?;
        tracing::info!(
            records = stats.records_forwarded,
            states = stats.states_captured,
            dropped = stats.lines_dropped,
            "Source stream complete"
        );
        Ok(())
    }

    async fn start_destination<'a, 'b>(
        &self,
        workspace: &Workspace,
        slot: &'a mut Option<ConnectorSession>,
        stdin_slot: &'b mut Option<OutputSink>,
    ) -> Result<(&'a mut ConnectorSession, &'b mut OutputSink, DestinationOutput)> {
        let spec = container_spec(
            &self.config,
            workspace,
            Role::Destination,
            workspace.write_command(),
        );
        let session =
            ConnectorSession::create(Arc::clone(&self.runtime), Role::Destination, &spec).await?;
        let session = slot.insert(session);
        let io = session.start().await?;
        enter(RunPhase::DestinationRunning);

        let Some(stdin) = io.stdin else {
            return Err(SyncError::ContainerStartFailed {
                image: spec.image,
                reason: "destination started without an attached stdin".into(),
            });
        };
        let stdin = stdin_slot.insert(OutputSink::writer(stdin));
        let mut stdout = io.stdout;
        let output = tokio::spawn(async move {
            let mut processor = StreamProcessor::new(Role::Destination);
            drain(&mut stdout, &mut processor).await
        });
        Ok((session, stdin, output))
    }

    /// Start the destination and feed it `input` until end of file.
    async fn feed_destination<R>(
        &self,
        workspace: &Workspace,
        slot: &mut Option<ConnectorSession>,
        stdin_slot: &mut Option<OutputSink>,
        input: &mut R,
        processor: &mut StreamProcessor,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let (destination, stdin, output) =
            self.start_destination(workspace, slot, stdin_slot).await?;
        let fed = match pump(input, processor, stdin).await {
            Ok(_) => close_stdin(stdin_slot).await,
            Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                drop(stdin_slot.take());
                Err(e)
            }
            Err(e) => return Err(SyncError::Stream(e)),
        };
        finish_destination(destination, output, fed).await
    }

    async fn reconcile_state(&self, captured: Option<Value>, summary: &mut RunSummary) {
        if self.config.full_refresh {
            tracing::info!("Full refresh; state file left untouched");
            return;
        }
        let Some(captured) = captured else {
            tracing::info!("No state captured; state file left untouched");
            return;
        };
        let state = match SyncState::from_value(captured) {
            Ok(state) => state,
            Err(e) => {
                record_warning(summary, format!("captured state not persisted: {e}"));
                return;
            }
        };

        let file = StateFile::new(&self.config.state_file);
        let path = file.path().display().to_string();
        match tokio::task::spawn_blocking(move || file.persist(&state)).await {
            Ok(Ok(())) => {
                tracing::info!(path = %path, "State persisted");
                summary.state_persisted = true;
            }
            Ok(Err(e)) => record_warning(summary, format!("state not persisted: {e}")),
            Err(e) => record_warning(summary, format!("state persist task panicked: {e}")),
        }
    }
}

fn record_warning(summary: &mut RunSummary, message: String) {
    tracing::warn!("{message}");
    summary.warnings.push(message);
}

/// Flush and close a held destination stdin, signalling end of input.
async fn close_stdin(slot: &mut Option<OutputSink>) -> std::io::Result<()> {
    match slot.take() {
        Some(stdin) => stdin.close().await,
        None => Ok(()),
    }
}

/// Wait for the destination to exit after its input has been fed, then
/// collect its output task. The exit status wins over a feed error.
async fn finish_destination(
    session: &mut ConnectorSession,
    output: DestinationOutput,
    fed: std::io::Result<()>,
) -> Result<()> {
    let exited = session.wait_for_exit().await;
    match output.await {
        Ok(Ok(stats)) => tracing::debug!(
            lines = stats.lines_seen,
            dropped = stats.lines_dropped,
            "Destination output drained"
        ),
        Ok(Err(e)) => tracing::warn!(error = %e, "Failed reading destination output"),
        Err(e) => tracing::warn!(error = %e, "Destination output task failed"),
    }
    exited?;
    fed.map_err(SyncError::Stream)
}

pub(crate) async fn wait_for_interrupt() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
