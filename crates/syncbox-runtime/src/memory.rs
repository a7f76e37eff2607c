//! Scripted in-process [`ContainerRuntime`] for tests and dry runs.
//!
//! Each `(image, subcommand)` pair can be scripted with the stdout bytes the
//! "container" produces and its exit code, or fed live through
//! [`InMemoryRuntime::stdout_feed`]. Interactive containers swallow their
//! stdin until it is closed; bytes are visible through
//! [`InMemoryRuntime::stdin_of`] as they arrive.

use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, DuplexStream};
use tokio::sync::oneshot;
use tokio::task::{AbortHandle, JoinHandle};

use crate::adapter::{AttachedIo, BoxedReader, BoxedWriter, ContainerRuntime};
use crate::error::{Result, RuntimeError};
use crate::spec::{ContainerId, ContainerSpec};

const STDIN_PIPE_CAPACITY: usize = 64 * 1024;
const STDOUT_FEED_CAPACITY: usize = 4 * 1024;

/// What a scripted container prints and how it exits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    pub stdout: Vec<u8>,
    pub exit_code: i64,
    /// Never exit; `wait` stays pending until the container is removed.
    pub hangs: bool,
}

type ScriptKey = (String, String);

struct FakeContainer {
    spec: ContainerSpec,
    script: Script,
    stdin_reader: Option<JoinHandle<()>>,
    stdin_abort: Option<AbortHandle>,
}

#[derive(Default)]
struct Inner {
    unavailable: bool,
    failing_pulls: HashSet<String>,
    scripts: HashMap<ScriptKey, Script>,
    feeds: HashMap<ScriptKey, DuplexStream>,
    stdin_gates: HashMap<String, oneshot::Receiver<()>>,
    next_id: u64,
    live: HashMap<ContainerId, FakeContainer>,
    pulled: Vec<String>,
    created: Vec<ContainerSpec>,
    removed: Vec<ContainerId>,
    stdin: HashMap<String, Vec<u8>>,
    stdin_closed: HashSet<String>,
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

fn key_of(spec: &ContainerSpec) -> ScriptKey {
    (spec.image.clone(), spec.subcommand().to_string())
}

/// In-memory container runtime.
#[derive(Default)]
pub struct InMemoryRuntime {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryRuntime {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A runtime whose availability check fails.
    #[must_use]
    pub fn unavailable() -> Self {
        let runtime = Self::default();
        runtime.lock().unavailable = true;
        runtime
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        lock(&self.inner)
    }

    /// Script the output of `image` when run with `subcommand`.
    #[must_use]
    pub fn script(
        self,
        image: &str,
        subcommand: &str,
        stdout: impl Into<Vec<u8>>,
        exit_code: i64,
    ) -> Self {
        self.lock().scripts.insert(
            (image.to_string(), subcommand.to_string()),
            Script {
                stdout: stdout.into(),
                exit_code,
                hangs: false,
            },
        );
        self
    }

    /// Make `image` run with `subcommand` print its scripted output and then
    /// never exit.
    #[must_use]
    pub fn hang(self, image: &str, subcommand: &str) -> Self {
        self.lock()
            .scripts
            .entry((image.to_string(), subcommand.to_string()))
            .or_default()
            .hangs = true;
        self
    }

    /// Make pulls of `image` fail.
    #[must_use]
    pub fn fail_pull(self, image: &str) -> Self {
        self.lock().failing_pulls.insert(image.to_string());
        self
    }

    /// Serve the next `image`/`subcommand` container's stdout from a pipe.
    ///
    /// Whatever is written to the returned end shows up on the container's
    /// stdout; dropping it ends the output. The scripted stdout is ignored.
    #[must_use]
    pub fn stdout_feed(&self, image: &str, subcommand: &str) -> DuplexStream {
        let (container_end, test_end) = tokio::io::duplex(STDOUT_FEED_CAPACITY);
        self.lock()
            .feeds
            .insert((image.to_string(), subcommand.to_string()), container_end);
        test_end
    }

    /// Hold the stdin of the next interactive `image` container unread until
    /// the returned sender fires or is dropped.
    #[must_use]
    pub fn gate_stdin(&self, image: &str) -> oneshot::Sender<()> {
        let (release, gate) = oneshot::channel();
        self.lock().stdin_gates.insert(image.to_string(), gate);
        release
    }

    /// Images pulled so far, in order.
    #[must_use]
    pub fn pulled(&self) -> Vec<String> {
        self.lock().pulled.clone()
    }

    /// Specs of every container created, in order.
    #[must_use]
    pub fn created(&self) -> Vec<ContainerSpec> {
        self.lock().created.clone()
    }

    /// Ids passed to [`ContainerRuntime::remove`], in order.
    #[must_use]
    pub fn removed(&self) -> Vec<ContainerId> {
        self.lock().removed.clone()
    }

    /// Ids created but not yet removed.
    #[must_use]
    pub fn live(&self) -> Vec<ContainerId> {
        self.lock().live.keys().cloned().collect()
    }

    /// Bytes the latest started container of `image` has read from stdin.
    #[must_use]
    pub fn stdin_of(&self, image: &str) -> Option<Vec<u8>> {
        self.lock().stdin.get(image).cloned()
    }

    /// Whether the latest container of `image` saw its stdin end normally,
    /// as opposed to being removed while still reading.
    #[must_use]
    pub fn stdin_closed(&self, image: &str) -> bool {
        self.lock().stdin_closed.contains(image)
    }

    fn script_for(inner: &Inner, spec: &ContainerSpec) -> Script {
        inner.scripts.get(&key_of(spec)).cloned().unwrap_or_default()
    }
}

/// Record everything read from a container's stdin, chunk by chunk.
async fn record_stdin(
    shared: Arc<Mutex<Inner>>,
    image: String,
    mut reader: DuplexStream,
    gate: Option<oneshot::Receiver<()>>,
) {
    if let Some(gate) = gate {
        let _ = gate.await;
    }
    let mut chunk = vec![0u8; 8 * 1024];
    let reached_eof = loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break true,
            Ok(n) => lock(&shared)
                .stdin
                .entry(image.clone())
                .or_default()
                .extend_from_slice(&chunk[..n]),
            Err(_) => break false,
        }
    };
    if reached_eof {
        lock(&shared).stdin_closed.insert(image);
    }
}

#[async_trait]
impl ContainerRuntime for InMemoryRuntime {
    async fn check_available(&self) -> Result<()> {
        if self.lock().unavailable {
            return Err(RuntimeError::Unavailable(
                "in-memory runtime marked unavailable".into(),
            ));
        }
        Ok(())
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        let mut inner = self.lock();
        if inner.failing_pulls.contains(image) {
            return Err(RuntimeError::PullFailed {
                image: image.to_string(),
                reason: "manifest unknown".into(),
            });
        }
        inner.pulled.push(image.to_string());
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerId> {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = ContainerId::new(format!("mem-{:012x}", inner.next_id));
        let script = Self::script_for(&inner, spec);
        inner.created.push(spec.clone());
        inner.live.insert(
            id.clone(),
            FakeContainer {
                spec: spec.clone(),
                script,
                stdin_reader: None,
                stdin_abort: None,
            },
        );
        Ok(id)
    }

    async fn start(&self, id: &ContainerId) -> Result<AttachedIo> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let container = inner
            .live
            .get_mut(id)
            .ok_or_else(|| RuntimeError::UnknownContainer(id.to_string()))?;
        let image = container.spec.image.clone();

        let stdin = if container.spec.interactive {
            let (writer, reader) = tokio::io::duplex(STDIN_PIPE_CAPACITY);
            inner.stdin.insert(image.clone(), Vec::new());
            inner.stdin_closed.remove(&image);
            let gate = inner.stdin_gates.remove(&image);
            let handle = tokio::spawn(record_stdin(Arc::clone(&self.inner), image, reader, gate));
            container.stdin_abort = Some(handle.abort_handle());
            container.stdin_reader = Some(handle);
            Some(Box::new(writer) as BoxedWriter)
        } else {
            None
        };

        let stdout: BoxedReader = match inner.feeds.remove(&key_of(&container.spec)) {
            Some(feed) => Box::new(feed),
            None => Box::new(Cursor::new(container.script.stdout.clone())),
        };
        Ok(AttachedIo { stdin, stdout })
    }

    async fn wait(&self, id: &ContainerId) -> Result<i64> {
        let (exit_code, hangs, reader) = {
            let mut inner = self.lock();
            let container = inner
                .live
                .get_mut(id)
                .ok_or_else(|| RuntimeError::UnknownContainer(id.to_string()))?;
            (
                container.script.exit_code,
                container.script.hangs,
                container.stdin_reader.take(),
            )
        };
        if hangs {
            std::future::pending::<()>().await;
        }

        if let Some(reader) = reader {
            reader.await.map_err(|e| RuntimeError::Operation {
                id: id.to_string(),
                reason: e.to_string(),
            })?;
        }
        Ok(exit_code)
    }

    async fn remove(&self, id: &ContainerId, _grace: Duration) -> Result<()> {
        let mut inner = self.lock();
        let Some(container) = inner.live.remove(id) else {
            return Err(RuntimeError::UnknownContainer(id.to_string()));
        };
        if let Some(reader) = container.stdin_abort {
            reader.abort();
        }
        inner.removed.push(id.clone());
        Ok(())
    }
}
