//! End-to-end tests for pipeline runs.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use sluice_config::PipelineDef;
use sluice_engine::{
  ChannelNotifier, EngineError, ExecutionEvent, LocalExecutor, OperatorState, PipelineRunner,
  Session, SessionConfig, TaskExecutor,
};
use sluice_process::Item;
use sluice_runtime::{RuntimeError, TaskOutcome, TaskRun};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Echoes the rendered script back as stdout; scripts containing "fail"
/// exit with status 1.
struct EchoExecutor;

#[async_trait]
impl TaskExecutor for EchoExecutor {
  async fn submit(&self, task: &TaskRun) -> Result<TaskOutcome, RuntimeError> {
    let exit_status = if task.script.contains("fail") { 1 } else { 0 };
    Ok(TaskOutcome {
      exit_status,
      stdout: Some(task.script.clone()),
    })
  }
}

fn pipeline(value: serde_json::Value) -> PipelineDef {
  serde_json::from_value(value).unwrap()
}

fn session(dir: &tempfile::TempDir, session_id: Option<uuid::Uuid>) -> Arc<Session> {
  Arc::new(Session::new(SessionConfig {
    session_id,
    pool_size: Some(4),
    work_dir: dir.path().to_path_buf(),
    ..Default::default()
  }))
}

fn sorted_texts(items: &[Item]) -> Vec<String> {
  let mut texts: Vec<String> = items.iter().map(Item::to_text).collect();
  texts.sort();
  texts
}

#[tokio::test]
async fn test_chained_processes() {
  let tmp = tempfile::tempdir().unwrap();
  let runner = PipelineRunner::new(session(&tmp, None), Arc::new(EchoExecutor));

  let def = pipeline(json!({
    "name": "chain",
    "params": { "suffix": "!" },
    "channels": [
      { "name": "xs", "items": [[1, 2]] },
      { "name": "ys", "items": ["a"] }
    ],
    "processes": [
      {
        "name": "pair",
        "inputs": [
          { "name": "x", "from": "xs", "type": "each" },
          { "name": "y", "from": "ys", "type": "val" }
        ],
        "outputs": [{ "type": "stdout", "into": "lines" }],
        "script": "echo {{ x }} {{ y }}"
      },
      {
        "name": "shout",
        "inputs": [{ "name": "line", "from": "lines", "type": "val" }],
        "outputs": [{ "type": "stdout", "into": "shouted" }],
        "script": "{{ line | upper }}{{ suffix }}"
      }
    ]
  }));

  let result = runner.run(&def, CancellationToken::new()).await.unwrap();

  assert_eq!(result.channels.len(), 1);
  assert_eq!(
    sorted_texts(&result.channels["shouted"]),
    vec!["ECHO 1 A!", "ECHO 2 A!"]
  );
  assert_eq!(result.report("pair").unwrap().firings, 2);
  assert_eq!(result.report("shout").unwrap().state, OperatorState::Completed);
}

#[tokio::test]
async fn test_unconsumed_seed_channel_is_returned() {
  let tmp = tempfile::tempdir().unwrap();
  let runner = PipelineRunner::new(session(&tmp, None), Arc::new(EchoExecutor));

  let def = pipeline(json!({
    "name": "idle",
    "channels": [{ "name": "leftover", "items": [1, 2] }],
    "processes": []
  }));

  let result = runner.run(&def, CancellationToken::new()).await.unwrap();
  assert_eq!(
    result.channels["leftover"],
    vec![Item::from(json!(1)), Item::from(json!(2))]
  );
}

#[tokio::test]
async fn test_failure_reports_process() {
  let tmp = tempfile::tempdir().unwrap();
  let runner = PipelineRunner::new(session(&tmp, None), Arc::new(EchoExecutor));

  let def = pipeline(json!({
    "name": "broken",
    "channels": [{ "name": "xs", "items": ["ok", "fail"] }],
    "processes": [{
      "name": "check",
      "inputs": [{ "name": "x", "from": "xs", "type": "val" }],
      "outputs": [{ "type": "stdout", "into": "out" }],
      "script": "check {{ x }}"
    }]
  }));

  let err = runner.run(&def, CancellationToken::new()).await.unwrap_err();
  match err {
    EngineError::ProcessFailed { processes } => assert_eq!(processes, vec!["check"]),
    other => panic!("expected process failure, got {:?}", other),
  }
}

#[tokio::test]
async fn test_cancelled_before_start() {
  let tmp = tempfile::tempdir().unwrap();
  let runner = PipelineRunner::new(session(&tmp, None), Arc::new(EchoExecutor));

  let def = pipeline(json!({
    "name": "cancelled",
    "channels": [{ "name": "xs", "items": [1] }],
    "processes": [{
      "name": "p",
      "inputs": [{ "name": "x", "from": "xs", "type": "val" }],
      "script": "run {{ x }}"
    }]
  }));

  let cancel = CancellationToken::new();
  cancel.cancel();

  let err = runner.run(&def, cancel).await.unwrap_err();
  assert!(matches!(err, EngineError::Cancelled));
}

#[cfg(unix)]
#[tokio::test]
async fn test_local_files_and_resume() {
  let tmp = tempfile::tempdir().unwrap();
  let def = pipeline(json!({
    "name": "files",
    "channels": [{ "name": "xs", "items": [1, 2] }],
    "processes": [
      {
        "name": "write",
        "inputs": [{ "name": "x", "from": "xs", "type": "val" }],
        "outputs": [{ "type": "file", "pattern": "out_*.txt", "into": "files" }],
        "script": "echo {{ x }} > out_{{ x }}.txt\n"
      },
      {
        "name": "read",
        "inputs": [{ "name": "f", "from": "files", "type": "file" }],
        "outputs": [{ "type": "stdout", "into": "contents" }],
        "script": "cat {{ f }}\n"
      }
    ]
  }));

  let first = session(&tmp, None);
  let session_id = *first.id();
  let runner = PipelineRunner::new(first, Arc::new(LocalExecutor::new()));
  let result = runner.run(&def, CancellationToken::new()).await.unwrap();
  assert_eq!(sorted_texts(&result.channels["contents"]), vec!["1\n", "2\n"]);

  let (tx, mut rx) = mpsc::unbounded_channel();
  let runner = PipelineRunner::new(session(&tmp, Some(session_id)), Arc::new(LocalExecutor::new()))
    .with_notifier(Arc::new(ChannelNotifier::new(tx)));
  let result = runner.run(&def, CancellationToken::new()).await.unwrap();
  assert_eq!(sorted_texts(&result.channels["contents"]), vec!["1\n", "2\n"]);

  let mut cached = 0;
  let mut started = 0;
  while let Ok(event) = rx.try_recv() {
    match event {
      ExecutionEvent::TaskCached { .. } => cached += 1,
      ExecutionEvent::TaskStarted { .. } => started += 1,
      _ => {}
    }
  }
  assert_eq!(cached, 4);
  assert_eq!(started, 0);
}
