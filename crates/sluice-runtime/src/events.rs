//! Execution events and notifiers for observability.
//!
//! Operators emit events as tasks move through their lifecycle so that
//! consumers can report progress, persist a trace, etc.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Events emitted while a pipeline runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecutionEvent {
  /// A task was handed to the executor.
  TaskStarted {
    process: String,
    task_index: u64,
    hash: String,
  },

  /// A task's outputs were recovered from a previous run.
  TaskCached {
    process: String,
    task_index: u64,
    work_dir: String,
  },

  /// A task completed and its outputs were emitted.
  TaskCompleted {
    process: String,
    task_index: u64,
    work_dir: String,
  },

  /// A firing failed.
  TaskFailed {
    process: String,
    task_index: u64,
    error: String,
  },

  /// An operator stopped; no further firings will happen.
  ProcessTerminated { process: String, firings: u64 },
}

/// Trait for receiving execution events.
///
/// Operators call `notify` for each event; implementations decide what to
/// do with them.
pub trait ExecutionNotifier: Send + Sync {
  fn notify(&self, event: ExecutionEvent);
}

/// A no-op notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
  fn notify(&self, _event: ExecutionEvent) {}
}

/// A notifier that sends events to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
    Self { sender }
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: ExecutionEvent) {
    // Receiver may have been dropped
    let _ = self.sender.send(event);
  }
}
