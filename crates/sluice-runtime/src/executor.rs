//! Task executors.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{error, info, instrument};

use crate::error::RuntimeError;
use crate::task::TaskRun;

/// Script written into the task work directory.
pub const COMMAND_SCRIPT: &str = ".command.sh";
/// Captured standard output.
pub const STDOUT_FILE: &str = ".command.out";
/// Captured standard error.
pub const STDERR_FILE: &str = ".command.err";
/// Exit status, written last.
pub const EXIT_CODE_FILE: &str = ".exitcode";

/// What an executor reports back for a finished task.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskOutcome {
  pub exit_status: i32,
  pub stdout: Option<String>,
}

impl TaskOutcome {
  pub fn success() -> Self {
    Self::default()
  }

  pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
    self.stdout = Some(stdout.into());
    self
  }
}

/// Runs prepared tasks.
///
/// The task's work directory exists by the time `submit` is called.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
  async fn submit(&self, task: &TaskRun) -> Result<TaskOutcome, RuntimeError>;
}

/// Runs task scripts with a local shell.
#[derive(Debug, Clone)]
pub struct LocalExecutor {
  shell: String,
}

impl Default for LocalExecutor {
  fn default() -> Self {
    Self::new()
  }
}

impl LocalExecutor {
  pub fn new() -> Self {
    Self {
      shell: "bash".to_string(),
    }
  }

  pub fn with_shell(shell: impl Into<String>) -> Self {
    Self {
      shell: shell.into(),
    }
  }

  async fn stage_inputs(&self, task: &TaskRun, work_dir: &Path) -> Result<(), RuntimeError> {
    for file in &task.input_files {
      let target = work_dir.join(&file.stage_name);
      if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
          .await
          .map_err(|e| RuntimeError::io(parent, e))?;
      }
      let source = std::path::absolute(&file.store_path)
        .map_err(|e| RuntimeError::io(&file.store_path, e))?;
      link(&source, &target)
        .await
        .map_err(|e| RuntimeError::io(&target, e))?;
    }
    Ok(())
  }

  async fn run(&self, task: &TaskRun, work_dir: &Path) -> Result<TaskOutcome, RuntimeError> {
    let script_path = work_dir.join(COMMAND_SCRIPT);
    tokio::fs::write(&script_path, &task.script)
      .await
      .map_err(|e| RuntimeError::io(&script_path, e))?;

    let mut cmd = Command::new(&self.shell);
    cmd
      .arg(COMMAND_SCRIPT)
      .current_dir(work_dir)
      .envs(&task.env)
      .stdin(if task.stdin.is_some() {
        Stdio::piped()
      } else {
        Stdio::null()
      })
      .stdout(Stdio::piped())
      .stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|e| RuntimeError::Executor {
      task: task.name(),
      message: format!("failed to spawn '{}': {}", self.shell, e),
    })?;

    // Written concurrently with draining stdout and stderr.
    let writer = match (task.stdin.clone(), child.stdin.take()) {
      (Some(data), Some(mut stdin)) => Some(tokio::spawn(async move {
        stdin.write_all(data.as_bytes()).await?;
        stdin.shutdown().await
      })),
      _ => None,
    };

    let output = child
      .wait_with_output()
      .await
      .map_err(|e| RuntimeError::Executor {
        task: task.name(),
        message: format!("failed to wait: {}", e),
      })?;

    if let Some(writer) = writer {
      match writer.await {
        Ok(Ok(())) => {}
        // The script exited without reading all of its input.
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
        Ok(Err(e)) => {
          return Err(RuntimeError::Executor {
            task: task.name(),
            message: format!("failed to write stdin: {}", e),
          });
        }
        Err(e) => {
          return Err(RuntimeError::Executor {
            task: task.name(),
            message: format!("stdin writer failed: {}", e),
          });
        }
      }
    }

    let exit_status = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let exit_text = exit_status.to_string();

    for (name, contents) in [
      (STDOUT_FILE, output.stdout.as_slice()),
      (STDERR_FILE, output.stderr.as_slice()),
      (EXIT_CODE_FILE, exit_text.as_bytes()),
    ] {
      let path = work_dir.join(name);
      tokio::fs::write(&path, contents)
        .await
        .map_err(|e| RuntimeError::io(&path, e))?;
    }

    Ok(TaskOutcome {
      exit_status,
      stdout: Some(stdout),
    })
  }
}

#[async_trait]
impl TaskExecutor for LocalExecutor {
  #[instrument(
    name = "task_execute",
    skip(self, task),
    fields(process = %task.process, task_index = task.index)
  )]
  async fn submit(&self, task: &TaskRun) -> Result<TaskOutcome, RuntimeError> {
    if task.native {
      return Err(RuntimeError::Executor {
        task: task.name(),
        message: "native bodies cannot run on the local shell".to_string(),
      });
    }
    let work_dir = task.work_dir.as_deref().ok_or_else(|| RuntimeError::Executor {
      task: task.name(),
      message: "task has no work directory".to_string(),
    })?;

    self.stage_inputs(task, work_dir).await?;
    let result = self.run(task, work_dir).await;

    match &result {
      Ok(outcome) => info!(exit_status = outcome.exit_status, "task exited"),
      Err(e) => error!(error = %e, "task could not run"),
    }

    result
  }
}

#[cfg(unix)]
async fn link(source: &Path, target: &Path) -> std::io::Result<()> {
  tokio::fs::symlink(source, target).await
}

#[cfg(not(unix))]
async fn link(source: &Path, target: &Path) -> std::io::Result<()> {
  tokio::fs::copy(source, target).await.map(|_| ())
}

#[cfg(all(test, unix))]
mod tests {
  use super::*;
  use sluice_process::FileHolder;
  use std::sync::Arc;

  fn task(dir: &Path, script: &str) -> TaskRun {
    let mut task = TaskRun::new("echo", 1, Arc::new(serde_json::Map::new()));
    task.script = script.to_string();
    task.work_dir = Some(dir.to_path_buf());
    task
  }

  #[tokio::test]
  async fn test_local_executor_records_outcome() {
    let tmp = tempfile::tempdir().unwrap();
    let mut task = task(tmp.path(), "echo \"$GREETING\"; cat");
    task.env.insert("GREETING".to_string(), "hello".to_string());
    task.stdin = Some("from stdin".to_string());

    let outcome = LocalExecutor::new().submit(&task).await.unwrap();

    assert_eq!(outcome.exit_status, 0);
    assert_eq!(outcome.stdout.as_deref(), Some("hello\nfrom stdin"));
    assert_eq!(
      std::fs::read_to_string(tmp.path().join(EXIT_CODE_FILE)).unwrap(),
      "0"
    );
    assert!(tmp.path().join(COMMAND_SCRIPT).exists());
  }

  #[tokio::test]
  async fn test_local_executor_streams_large_stdin() {
    let tmp = tempfile::tempdir().unwrap();
    let mut task = task(tmp.path(), "cat");
    let data = "ACGT".repeat(256 * 1024);
    task.stdin = Some(data.clone());

    let outcome = tokio::time::timeout(
      std::time::Duration::from_secs(30),
      LocalExecutor::new().submit(&task),
    )
    .await
    .expect("executor blocked on stdin")
    .unwrap();

    assert_eq!(outcome.exit_status, 0);
    assert_eq!(outcome.stdout.map(|s| s.len()), Some(data.len()));
  }

  #[tokio::test]
  async fn test_local_executor_unread_stdin() {
    let tmp = tempfile::tempdir().unwrap();
    let mut task = task(tmp.path(), "echo done");
    task.stdin = Some("x".repeat(1024 * 1024));

    let outcome = LocalExecutor::new().submit(&task).await.unwrap();
    assert_eq!(outcome.stdout.as_deref(), Some("done\n"));
  }

  #[tokio::test]
  async fn test_local_executor_non_zero_exit() {
    let tmp = tempfile::tempdir().unwrap();
    let task = task(tmp.path(), "echo oops >&2; exit 3");

    let outcome = LocalExecutor::new().submit(&task).await.unwrap();

    assert_eq!(outcome.exit_status, 3);
    assert_eq!(
      std::fs::read_to_string(tmp.path().join(STDERR_FILE)).unwrap(),
      "oops\n"
    );
  }

  #[tokio::test]
  async fn test_local_executor_stages_inputs() {
    let store = tempfile::tempdir().unwrap();
    let source = store.path().join("reads.fq");
    std::fs::write(&source, "ACGT\n").unwrap();

    let tmp = tempfile::tempdir().unwrap();
    let mut task = task(tmp.path(), "cat input/sample.fq");
    task
      .input_files
      .push(FileHolder::new(&source).with_name("input/sample.fq"));

    let outcome = LocalExecutor::new().submit(&task).await.unwrap();
    assert_eq!(outcome.stdout.as_deref(), Some("ACGT\n"));
  }

  #[tokio::test]
  async fn test_native_body_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let mut task = task(tmp.path(), "builtin");
    task.native = true;

    let err = LocalExecutor::new().submit(&task).await.unwrap_err();
    assert!(matches!(err, RuntimeError::Executor { .. }));
  }
}
