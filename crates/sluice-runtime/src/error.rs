//! Runtime errors.

use std::path::PathBuf;

use sluice_process::DeclarationError;

/// Errors that can occur while scheduling and running tasks.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
  /// A declaration problem that only shows up at run time.
  #[error(transparent)]
  Declaration(#[from] DeclarationError),

  /// An input value could not be bound.
  #[error("input resolution failed for '{param}' in process '{process}': {message}")]
  InputResolution {
    process: String,
    param: String,
    message: String,
  },

  /// Script template rendering failed.
  #[error("failed to render script for process '{process}': {message}")]
  Render { process: String, message: String },

  /// The executor could not run the task.
  #[error("executor failed for task {task}: {message}")]
  Executor { task: String, message: String },

  /// The task ran and exited with a non-zero status.
  #[error("task {task} terminated with exit status {exit_status}")]
  TaskFailed { task: String, exit_status: i32 },

  /// A declared output could not be collected from a completed task.
  #[error("missing output '{param}' for task {task}: {message}")]
  MissingOutput {
    task: String,
    param: String,
    message: String,
  },

  #[error("channel '{channel}' is closed")]
  ChannelClosed { channel: String },

  #[error("channel '{channel}' already has a consumer")]
  ChannelConsumed { channel: String },

  #[error("shared value '{param}' read before it was captured")]
  SharedNotCaptured { param: String },

  #[error("shared value '{param}' captured twice")]
  SharedAlreadyCaptured { param: String },

  #[error("combiner failed for process '{process}': {message}")]
  Combiner { process: String, message: String },

  #[error("i/o error on '{}': {source}", .path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("operator for process '{process}' did not finish cleanly: {message}")]
  Join { process: String, message: String },
}

impl RuntimeError {
  /// Errors that stop the operator no matter what the error strategy says.
  pub fn is_fatal(&self) -> bool {
    matches!(
      self,
      RuntimeError::Declaration(_)
        | RuntimeError::SharedNotCaptured { .. }
        | RuntimeError::SharedAlreadyCaptured { .. }
        | RuntimeError::Combiner { .. }
    )
  }

  pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
    RuntimeError::Io {
      path: path.into(),
      source,
    }
  }
}
