//! End-to-end runs of the orchestrator against the in-memory runtime.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use syncbox_engine::{Orchestrator, RunSummary, SyncError};
use syncbox_runtime::InMemoryRuntime;
use syncbox_types::{ConnectorSpec, HandoffMode, Role, RunConfig, RunMode, SourceOutput};
use tokio::io::AsyncWriteExt;

const SRC: &str = "acme/source-pg:1.0";
const DST: &str = "acme/destination-s3:1.0";

const RECORD_1: &str = r#"{"type":"RECORD","record":{"stream":"users","data":{"id":1}}}"#;
const RECORD_2: &str = r#"{"type":"RECORD","record":{"stream":"users","data":{"id":2}}}"#;
const STATE_1: &str = r#"{"type":"STATE","state":{"cursor":1}}"#;

fn lines(parts: &[&str]) -> String {
    parts.iter().map(|l| format!("{l}\n")).collect()
}

fn base_config(root: &Path) -> RunConfig {
    let mut config = RunConfig::new(ConnectorSpec::new(SRC), ConnectorSpec::new(DST));
    config.work_dir = root.to_path_buf();
    config.workspace_root = root.join("ws");
    config.state_file = root.join("state.json");
    config
}

fn workspaces_left(root: &Path) -> usize {
    fs::read_dir(root.join("ws")).map_or(0, Iterator::count)
}

fn read_json(path: &Path) -> serde_json::Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

async fn run(runtime: &Arc<InMemoryRuntime>, config: RunConfig) -> Result<RunSummary, SyncError> {
    Orchestrator::new(runtime.clone(), config)
        .run_until(std::future::pending())
        .await
}

async fn wait_until(mut ready: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !ready() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn streaming_config(root: &Path) -> RunConfig {
    let mut config = base_config(root);
    config.handoff = HandoffMode::Streaming;
    config
}

fn source_only_to(path: PathBuf) -> RunMode {
    RunMode::SourceOnly {
        output: SourceOutput::File(path),
    }
}

#[tokio::test]
async fn source_only_file_holds_records_and_state_is_persisted() {
    let root = tempfile::tempdir().unwrap();
    let runtime = Arc::new(InMemoryRuntime::new().script(SRC, "read", lines(&[RECORD_1, STATE_1]), 0));
    let out = root.path().join("out.jsonl");
    let mut config = base_config(root.path());
    config.mode = source_only_to(out.clone());

    let summary = run(&runtime, config).await.unwrap();

    assert_eq!(fs::read_to_string(&out).unwrap(), lines(&[RECORD_1]));
    assert_eq!(read_json(&root.path().join("state.json")), json!({"cursor": 1}));
    assert!(summary.state_persisted);
    assert_eq!(summary.mode, "source_only");
    assert_eq!(summary.records_forwarded, 1);
    assert_eq!(summary.states_captured, 1);
    assert_eq!(runtime.pulled(), vec![SRC.to_string()]);
    assert_eq!(runtime.removed().len(), 1);
    assert!(runtime.live().is_empty());
    assert_eq!(workspaces_left(root.path()), 0);
}

#[tokio::test]
async fn raw_messages_forward_every_line_verbatim() {
    let root = tempfile::tempdir().unwrap();
    let log = r#"{"type":"LOG","log":{"level":"INFO","message":"reading users"}}"#;
    let runtime = Arc::new(InMemoryRuntime::new().script(
        SRC,
        "read",
        lines(&[log, RECORD_1, STATE_1]),
        0,
    ));
    let out = root.path().join("raw.jsonl");
    let mut config = base_config(root.path());
    config.mode = source_only_to(out.clone());
    config.raw_messages = true;

    run(&runtime, config).await.unwrap();

    assert_eq!(fs::read_to_string(&out).unwrap(), lines(&[log, RECORD_1, STATE_1]));
    assert_eq!(read_json(&root.path().join("state.json")), json!({"cursor": 1}));
}

#[tokio::test]
async fn malformed_line_is_dropped_and_sync_succeeds() {
    let root = tempfile::tempdir().unwrap();
    let runtime = Arc::new(InMemoryRuntime::new().script(
        SRC,
        "read",
        lines(&[RECORD_1, "Picked up JAVA_TOOL_OPTIONS: -Xmx1g", RECORD_2]),
        0,
    ));

    let summary = run(&runtime, base_config(root.path())).await.unwrap();

    assert_eq!(runtime.stdin_of(DST).unwrap(), lines(&[RECORD_1, RECORD_2]).into_bytes());
    assert_eq!(summary.records_forwarded, 2);
    assert_eq!(summary.lines_dropped, 1);
    assert!(!summary.state_persisted);
    assert!(!root.path().join("state.json").exists());
    assert_eq!(runtime.removed().len(), 2);
}

#[tokio::test]
async fn buffered_handoff_runs_source_before_destination() {
    let root = tempfile::tempdir().unwrap();
    let runtime = Arc::new(InMemoryRuntime::new().script(SRC, "read", lines(&[RECORD_1, STATE_1]), 0));

    let summary = run(&runtime, base_config(root.path())).await.unwrap();

    let commands: Vec<(String, String)> = runtime
        .created()
        .iter()
        .map(|spec| (spec.image.clone(), spec.subcommand().to_string()))
        .collect();
    assert_eq!(
        commands,
        vec![
            (SRC.to_string(), "read".to_string()),
            (DST.to_string(), "write".to_string()),
        ]
    );
    assert_eq!(runtime.stdin_of(DST).unwrap(), lines(&[RECORD_1, STATE_1]).into_bytes());
    assert_eq!(runtime.pulled(), vec![SRC.to_string(), DST.to_string()]);
    assert!(summary.state_persisted);
    assert!(root.path().join("syncbox_config.json").exists());
}

#[tokio::test]
async fn streaming_handoff_applies_stream_prefix() {
    let root = tempfile::tempdir().unwrap();
    let runtime = Arc::new(InMemoryRuntime::new().script(SRC, "read", lines(&[RECORD_1, STATE_1]), 0));
    let mut config = base_config(root.path());
    config.handoff = HandoffMode::Streaming;
    config.destination_stream_prefix = Some("crm_".into());

    let summary = run(&runtime, config).await.unwrap();

    let prefixed = r#"{"type":"RECORD","record":{"stream":"crm_users","data":{"id":1}}}"#;
    assert_eq!(runtime.stdin_of(DST).unwrap(), lines(&[prefixed, STATE_1]).into_bytes());
    assert_eq!(read_json(&root.path().join("state.json")), json!({"cursor": 1}));
    assert!(summary.state_persisted);
    assert!(runtime.live().is_empty());
}

#[tokio::test]
async fn streaming_handoff_delivers_lines_while_source_is_running() {
    let root = tempfile::tempdir().unwrap();
    let runtime = Arc::new(InMemoryRuntime::new());
    let mut source_stdout = runtime.stdout_feed(SRC, "read");
    let orchestrator = Orchestrator::new(runtime.clone(), streaming_config(root.path()));

    let producer = async {
        source_stdout
            .write_all(lines(&[RECORD_1]).as_bytes())
            .await
            .unwrap();
        let first = lines(&[RECORD_1]).into_bytes();
        wait_until(|| runtime.stdin_of(DST).is_some_and(|got| got == first)).await;
        assert_eq!(runtime.live().len(), 2);
        assert!(!runtime.stdin_closed(DST));

        source_stdout
            .write_all(lines(&[RECORD_2, STATE_1]).as_bytes())
            .await
            .unwrap();
        drop(source_stdout);
    };
    let (summary, ()) = tokio::join!(orchestrator.run_until(std::future::pending()), producer);

    let summary = summary.unwrap();
    assert_eq!(summary.records_forwarded, 2);
    assert_eq!(
        runtime.stdin_of(DST).unwrap(),
        lines(&[RECORD_1, RECORD_2, STATE_1]).into_bytes()
    );
    assert!(runtime.stdin_closed(DST));
    assert_eq!(read_json(&root.path().join("state.json")), json!({"cursor": 1}));
}

#[tokio::test]
async fn stalled_destination_stops_source_reads() {
    const LINES: usize = 8192;
    let root = tempfile::tempdir().unwrap();
    let runtime = Arc::new(InMemoryRuntime::new());
    let mut source_stdout = runtime.stdout_feed(SRC, "read");
    let release = runtime.gate_stdin(DST);
    let orchestrator = Orchestrator::new(runtime.clone(), streaming_config(root.path()));

    let batch = lines(&[RECORD_1]).repeat(LINES);
    let expected = batch.len();
    let writer = tokio::spawn(async move {
        source_stdout.write_all(batch.as_bytes()).await.unwrap();
    });
    let consumer = async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!writer.is_finished(), "source output was not held back");
        assert!(runtime.stdin_of(DST).unwrap_or_default().is_empty());

        release.send(()).unwrap();
        writer.await.unwrap();
    };
    let (summary, ()) = tokio::join!(orchestrator.run_until(std::future::pending()), consumer);

    assert_eq!(summary.unwrap().records_forwarded, LINES as u64);
    assert_eq!(runtime.stdin_of(DST).unwrap().len(), expected);
    assert!(runtime.live().is_empty());
}

#[tokio::test]
async fn streaming_source_failure_never_ends_destination_input() {
    let root = tempfile::tempdir().unwrap();
    let runtime = Arc::new(InMemoryRuntime::new().script(SRC, "read", lines(&[RECORD_1]), 1));

    let err = run(&runtime, streaming_config(root.path())).await.unwrap_err();

    assert!(matches!(
        err,
        SyncError::ConnectorFailed {
            role: Role::Source,
            exit_code: 1
        }
    ));
    assert!(!runtime.stdin_closed(DST));
    assert_eq!(runtime.removed().len(), 2);
    assert!(runtime.live().is_empty());
    assert_eq!(workspaces_left(root.path()), 0);
    assert!(!root.path().join("state.json").exists());
}

#[tokio::test]
async fn full_refresh_neither_reads_nor_rewrites_state() {
    let root = tempfile::tempdir().unwrap();
    let state_path = root.path().join("state.json");
    fs::write(&state_path, "{\"cursor\": 0}\n").unwrap();
    let runtime = Arc::new(InMemoryRuntime::new().script(
        SRC,
        "read",
        lines(&[RECORD_1, r#"{"type":"STATE","state":{"cursor":5}}"#]),
        0,
    ));
    let mut config = base_config(root.path());
    config.full_refresh = true;
    config.keep_containers = true;

    let summary = run(&runtime, config).await.unwrap();

    assert_eq!(fs::read_to_string(&state_path).unwrap(), "{\"cursor\": 0}\n");
    assert!(!summary.state_persisted);

    let ws = fs::read_dir(root.path().join("ws"))
        .unwrap()
        .next()
        .unwrap()
        .unwrap()
        .path();
    assert_eq!(fs::read_to_string(ws.join("state.json")).unwrap(), "{}\n");
}

#[tokio::test]
async fn destination_failure_still_cleans_up() {
    let root = tempfile::tempdir().unwrap();
    let runtime = Arc::new(
        InMemoryRuntime::new()
            .script(SRC, "read", lines(&[RECORD_1, STATE_1]), 0)
            .script(DST, "write", "", 2),
    );

    let err = run(&runtime, base_config(root.path())).await.unwrap_err();

    assert!(matches!(
        err,
        SyncError::ConnectorFailed {
            role: Role::Destination,
            exit_code: 2
        }
    ));
    assert_eq!(runtime.removed().len(), 2);
    assert!(runtime.live().is_empty());
    assert_eq!(workspaces_left(root.path()), 0);
    assert!(!root.path().join("state.json").exists());
}

#[tokio::test]
async fn source_failure_never_starts_destination() {
    let root = tempfile::tempdir().unwrap();
    let runtime = Arc::new(InMemoryRuntime::new().script(SRC, "read", lines(&[RECORD_1]), 1));

    let err = run(&runtime, base_config(root.path())).await.unwrap_err();

    assert!(matches!(
        err,
        SyncError::ConnectorFailed {
            role: Role::Source,
            exit_code: 1
        }
    ));
    assert!(runtime.created().iter().all(|spec| spec.image == SRC));
    assert_eq!(workspaces_left(root.path()), 0);
}

#[tokio::test]
async fn interrupt_stops_live_containers() {
    let root = tempfile::tempdir().unwrap();
    let runtime = Arc::new(
        InMemoryRuntime::new()
            .script(SRC, "read", lines(&[RECORD_1]), 0)
            .hang(SRC, "read"),
    );
    let watcher = Arc::clone(&runtime);
    let shutdown = async move {
        while watcher.live().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };

    let err = Orchestrator::new(runtime.clone(), base_config(root.path()))
        .run_until(shutdown)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Interrupted));
    assert_eq!(err.exit_code(), 130);
    assert_eq!(runtime.removed().len(), 1);
    assert!(runtime.live().is_empty());
    assert_eq!(workspaces_left(root.path()), 0);
}

#[tokio::test]
async fn destination_only_replays_input_file() {
    let root = tempfile::tempdir().unwrap();
    let input = root.path().join("captured.jsonl");
    fs::write(&input, lines(&[RECORD_1, "garbage", STATE_1])).unwrap();
    let runtime = Arc::new(InMemoryRuntime::new());
    let mut config = base_config(root.path());
    config.mode = RunMode::DestinationOnly { input };
    config.check_connection = true;

    let summary = run(&runtime, config).await.unwrap();

    assert_eq!(runtime.pulled(), vec![DST.to_string()]);
    assert_eq!(runtime.created().len(), 1);
    assert_eq!(runtime.stdin_of(DST).unwrap(), lines(&[RECORD_1, STATE_1]).into_bytes());
    assert_eq!(summary.mode, "destination_only");
    assert_eq!(summary.lines_dropped, 1);
    assert_eq!(read_json(&root.path().join("state.json")), json!({"cursor": 1}));
}

#[tokio::test]
async fn pull_skip_flags_are_honored() {
    let root = tempfile::tempdir().unwrap();
    let runtime = Arc::new(InMemoryRuntime::new());
    let mut config = base_config(root.path());
    config.pull_source = false;

    run(&runtime, config).await.unwrap();

    assert_eq!(runtime.pulled(), vec![DST.to_string()]);
}

#[tokio::test]
async fn pull_failure_aborts_before_containers_start() {
    let root = tempfile::tempdir().unwrap();
    let runtime = Arc::new(InMemoryRuntime::new().fail_pull(DST));

    let err = run(&runtime, base_config(root.path())).await.unwrap_err();

    assert!(matches!(err, SyncError::PullFailed { ref image, .. } if image == DST));
    assert!(runtime.created().is_empty());
    assert_eq!(workspaces_left(root.path()), 0);
}

#[tokio::test]
async fn unavailable_runtime_fails_before_workspace_exists() {
    let root = tempfile::tempdir().unwrap();
    let runtime = Arc::new(InMemoryRuntime::unavailable());

    let err = run(&runtime, base_config(root.path())).await.unwrap_err();

    assert!(matches!(err, SyncError::RuntimeUnavailable(_)));
    assert!(!root.path().join("ws").exists());
}

#[tokio::test]
async fn failed_connection_check_reports_connector_message() {
    let root = tempfile::tempdir().unwrap();
    let runtime = Arc::new(InMemoryRuntime::new().script(
        SRC,
        "check",
        r#"{"type":"CONNECTION_STATUS","connectionStatus":{"status":"FAILED","message":"bad token"}}"#,
        0,
    ));
    let mut config = base_config(root.path());
    config.check_connection = true;

    let err = run(&runtime, config).await.unwrap_err();

    match err {
        SyncError::ConnectionCheckFailed { message } => assert_eq!(message, "bad token"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(runtime.created().iter().all(|spec| spec.subcommand() == "check"));
    assert_eq!(runtime.removed().len(), 1);
    assert_eq!(workspaces_left(root.path()), 0);
}

#[tokio::test]
async fn interrupt_during_connection_check_stops_check_container() {
    let root = tempfile::tempdir().unwrap();
    let runtime = Arc::new(InMemoryRuntime::new().hang(SRC, "check"));
    let mut config = base_config(root.path());
    config.check_connection = true;
    let watcher = Arc::clone(&runtime);
    let shutdown = async move {
        while watcher.live().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };

    let err = Orchestrator::new(runtime.clone(), config)
        .run_until(shutdown)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Interrupted));
    assert_eq!(runtime.created().len(), 1);
    assert_eq!(runtime.created()[0].subcommand(), "check");
    assert_eq!(runtime.removed().len(), 1);
    assert!(runtime.live().is_empty());
    assert_eq!(workspaces_left(root.path()), 0);
}

#[tokio::test]
async fn invalid_config_starts_nothing() {
    let root = tempfile::tempdir().unwrap();
    let runtime = Arc::new(InMemoryRuntime::new());
    let mut config = base_config(root.path());
    config.destination.image = String::new();

    let err = run(&runtime, config).await.unwrap_err();

    assert!(matches!(err, SyncError::ConfigInvalid(_)));
    assert_eq!(err.exit_code(), 2);
    assert!(runtime.pulled().is_empty());
    assert!(!root.path().join("ws").exists());
}

#[tokio::test]
async fn keep_containers_leaves_everything_in_place() {
    let root = tempfile::tempdir().unwrap();
    let runtime = Arc::new(InMemoryRuntime::new().script(SRC, "read", lines(&[RECORD_1]), 0));
    let mut config = base_config(root.path());
    config.keep_containers = true;

    run(&runtime, config).await.unwrap();

    assert!(runtime.removed().is_empty());
    assert_eq!(runtime.live().len(), 2);
    assert_eq!(workspaces_left(root.path()), 1);
}
