//! Error types for pipeline execution.

use sluice_process::DeclarationError;
use sluice_runtime::RuntimeError;
use thiserror::Error;

/// Errors that can occur while assembling or running a pipeline.
#[derive(Debug, Error)]
pub enum EngineError {
  /// A process declaration failed validation.
  #[error(transparent)]
  Declaration(#[from] DeclarationError),

  /// Wiring or running an operator failed.
  #[error(transparent)]
  Runtime(#[from] RuntimeError),

  /// The pipeline definition is inconsistent.
  #[error("invalid pipeline: {message}")]
  InvalidPipeline { message: String },

  /// One or more processes were terminated by an error.
  #[error("pipeline failed in process(es): {}", .processes.join(", "))]
  ProcessFailed { processes: Vec<String> },

  /// The run was cancelled from outside.
  #[error("pipeline run cancelled")]
  Cancelled,
}
