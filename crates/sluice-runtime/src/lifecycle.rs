//! Operator lifecycle hooks.
//!
//! Every operator owns a [`Hooks`] value that assigns task indices and fans
//! lifecycle callbacks out to its listeners:
//!
//! ```text
//! before_firing ─► resolve/render/hash ─► execute ─► bind outputs ─► after_firing
//!                              │                │
//!                              └──── on_exception (vote) ◄──┘
//! on_data_message / on_control_message   (port reader)
//! after_stop                             (once, when the operator stops)
//! ```
//!
//! An error terminates the operator if any listener votes for it, if a
//! listener hook itself fails, or if the error is fatal.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use sluice_process::{ErrorStrategy, Item};
use tracing::{error, warn};

use crate::error::RuntimeError;
use crate::task::TaskRun;

/// Identifies a single firing to the listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiringContext {
  pub process: String,
  /// 1-based, strictly increasing within the operator.
  pub task_index: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorState {
  Idle,
  Running,
  /// All inputs closed and every firing finished.
  Completed,
  /// Stopped early because an error terminated the operator.
  Failed,
  Stopped,
}

/// A failure inside a listener hook.
#[derive(Debug, Clone, thiserror::Error)]
#[error("listener '{listener}' failed: {message}")]
pub struct HookError {
  pub listener: String,
  pub message: String,
}

/// Observes an operator's lifecycle.
///
/// Every method has a no-op default. `on_exception` returns whether the
/// listener wants the operator terminated; the default abstains.
pub trait OperatorListener: Send + Sync {
  fn name(&self) -> &str;

  fn before_firing(&self, _ctx: &FiringContext) -> Result<(), HookError> {
    Ok(())
  }

  /// Called once per firing, whether it succeeded or failed. `task` is
  /// `None` when the firing failed before its task was prepared.
  fn after_firing(
    &self,
    _ctx: &FiringContext,
    _task: Option<&TaskRun>,
  ) -> Result<(), HookError> {
    Ok(())
  }

  fn on_data_message(&self, _process: &str, _port: usize, _item: &Item) {}

  fn on_control_message(&self, _process: &str, _port: usize) {}

  fn on_exception(&self, _ctx: &FiringContext, _error: &RuntimeError) -> Result<bool, HookError> {
    Ok(false)
  }

  fn after_stop(&self, _process: &str) {}
}

/// The error policy configured on a process.
#[derive(Debug, Clone)]
pub struct ErrorPolicy {
  strategy: ErrorStrategy,
}

impl ErrorPolicy {
  pub fn new(strategy: ErrorStrategy) -> Self {
    Self { strategy }
  }
}

impl OperatorListener for ErrorPolicy {
  fn name(&self) -> &str {
    "error_policy"
  }

  fn on_exception(&self, ctx: &FiringContext, error: &RuntimeError) -> Result<bool, HookError> {
    match self.strategy {
      ErrorStrategy::Terminate => Ok(true),
      ErrorStrategy::Ignore => {
        warn!(
          process = %ctx.process,
          task_index = ctx.task_index,
          error = %error,
          "ignoring task failure"
        );
        Ok(false)
      }
    }
  }
}

/// Lifecycle callbacks of one operator.
///
/// Cheap to clone; clones share the task counter and listener list.
#[derive(Clone)]
pub(crate) struct Hooks {
  process: Arc<str>,
  counter: Arc<AtomicU64>,
  listeners: Arc<[Arc<dyn OperatorListener>]>,
}

impl Hooks {
  pub fn new(process: &str, listeners: Vec<Arc<dyn OperatorListener>>) -> Self {
    Self {
      process: Arc::from(process),
      counter: Arc::new(AtomicU64::new(0)),
      listeners: listeners.into(),
    }
  }

  pub fn process(&self) -> &str {
    &self.process
  }

  /// Number of firings started so far.
  pub fn firings(&self) -> u64 {
    self.counter.load(Ordering::SeqCst)
  }

  /// Assign the next task index and notify listeners.
  pub fn before_firing(&self) -> Result<FiringContext, HookError> {
    let ctx = FiringContext {
      process: self.process.to_string(),
      task_index: self.counter.fetch_add(1, Ordering::SeqCst) + 1,
    };
    for listener in self.listeners.iter() {
      listener.before_firing(&ctx)?;
    }
    Ok(ctx)
  }

  pub fn after_firing(
    &self,
    ctx: &FiringContext,
    task: Option<&TaskRun>,
  ) -> Result<(), HookError> {
    for listener in self.listeners.iter() {
      listener.after_firing(ctx, task)?;
    }
    Ok(())
  }

  pub fn on_data_message(&self, port: usize, item: &Item) {
    for listener in self.listeners.iter() {
      listener.on_data_message(&self.process, port, item);
    }
  }

  pub fn on_control_message(&self, port: usize) {
    for listener in self.listeners.iter() {
      listener.on_control_message(&self.process, port);
    }
  }

  /// Collect termination votes for `error`.
  pub fn on_exception(&self, ctx: &FiringContext, err: &RuntimeError) -> bool {
    let mut terminate = err.is_fatal();
    for listener in self.listeners.iter() {
      match listener.on_exception(ctx, err) {
        Ok(vote) => terminate |= vote,
        Err(hook_err) => {
          error!(
            process = %self.process,
            task_index = ctx.task_index,
            error = %hook_err,
            "exception handler failed"
          );
          terminate = true;
        }
      }
    }
    terminate
  }

  pub fn after_stop(&self) {
    for listener in self.listeners.iter() {
      listener.after_stop(&self.process);
    }
  }
}
